/// A state machine whose transitions are driven by an input event.
///
/// `Context` carries whatever side-channel the transition is allowed to
/// adjust alongside the state itself (for the control protocol, the
/// framing the connection should read with next).
pub trait FiniteStateMachine: Sized {
    type Input;
    type Context;

    #[must_use]
    fn transition(self, input: Self::Input, context: &mut Self::Context) -> Self;
}
