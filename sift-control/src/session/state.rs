use sift_common::traits::fsm::FiniteStateMachine;

use crate::dispatcher::Framing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    /// Waiting for a command line
    #[default]
    Command,
    /// A reply is queued; the next command is read once it has been written
    Reply,
    /// Waiting for a learn payload
    Learn,
    /// Close once the pending reply has been written
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A command produced an ordinary reply
    Replied,
    /// A learn command was accepted; a payload of this many bytes follows
    Learn(usize),
    /// The learn payload has been processed
    Learned,
    Quit,
    /// Everything queued for the client has been written
    WriteDone,
}

impl State {
    /// Nothing further is read from the client in this state
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Quit)
    }
}

impl FiniteStateMachine for State {
    type Input = Event;
    type Context = Framing;

    fn transition(self, input: Event, framing: &mut Framing) -> Self {
        match (self, input) {
            (Self::Command, Event::Replied) => Self::Reply,
            (Self::Command, Event::Learn(size)) => {
                *framing = Framing::Fixed(size);
                Self::Learn
            }
            (Self::Command, Event::Quit) => Self::Quit,
            (Self::Learn, Event::Learned) => {
                *framing = Framing::Line;
                Self::Reply
            }
            (Self::Reply, Event::WriteDone) => {
                *framing = Framing::Line;
                Self::Command
            }
            (state, _) => state,
        }
    }
}
