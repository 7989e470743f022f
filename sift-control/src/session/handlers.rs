use subtle::ConstantTimeEq;

use super::{Context, learn, state::Event};
use crate::{
    command::{Command, CommandKind},
    supervisor::SupervisorRequest,
};

const HELP: &str = concat!(
    "Sift CLI commands (* - privileged command):\r\n",
    "    help - this help message\r\n",
    "(*) learn <statfile> <size> [-r recipient], [-f from] [-n] - learn message to specified statfile\r\n",
    "    quit - quit CLI session\r\n",
    "(*) reload - reload sift\r\n",
    "(*) shutdown - shutdown sift\r\n",
    "    stat - show different sift stat\r\n",
    "    uptime - sift uptime",
);

fn plural(value: u64) -> &'static str {
    if value > 1 { "s" } else { "" }
}

/// Render an uptime given in whole seconds
pub fn format_uptime(uptime: u64) -> String {
    if uptime >= 2 * 3600 {
        let days = uptime / 86400;
        let hours = (uptime % 86400) / 3600;
        let minutes = (uptime % 3600) / 60;

        format!(
            "{days} day{} {hours} hour{} {minutes} minute{}",
            plural(days),
            plural(hours),
            plural(minutes)
        )
    } else if uptime < 60 {
        format!("{uptime} second{}", plural(uptime))
    } else {
        let hours = uptime / 3600;
        let minutes = (uptime % 3600) / 60;
        let seconds = uptime % 60;

        format!(
            "{hours} hour{} {minutes} minute{} {seconds} second{}",
            plural(hours),
            plural(minutes),
            plural(seconds)
        )
    }
}

impl Context {
    pub(super) fn dispatch(&mut self, command: &Command, args: &[&str]) {
        if command.privileged && !self.authorized {
            tracing::debug!("Refusing unauthorized {}", command.name);
            self.reply("not authorized");
            return;
        }

        match command.kind {
            CommandKind::Password => self.password(args),
            CommandKind::Quit => self.transition(Event::Quit),
            CommandKind::Reload => self.supervise(SupervisorRequest::Reload),
            CommandKind::Stat => self.stat(),
            CommandKind::Shutdown => self.supervise(SupervisorRequest::Shutdown),
            CommandKind::Uptime => {
                let uptime = self.args.services.start_time.elapsed().as_secs();
                self.reply(format_uptime(uptime));
            }
            CommandKind::Learn => self.learn(args),
            CommandKind::Help => self.reply(HELP),
        }
    }

    fn password(&mut self, args: &[&str]) {
        let Some(attempt) = args.first().filter(|arg| !arg.is_empty()) else {
            self.reply("password command requires one argument");
            return;
        };

        let expected = self.args.password.as_bytes();
        self.authorized = !expected.is_empty() && bool::from(attempt.as_bytes().ct_eq(expected));

        if self.authorized {
            self.reply("password accepted");
        } else {
            tracing::debug!("Rejected control password");
            self.reply("password NOT accepted");
        }
    }

    fn supervise(&mut self, request: SupervisorRequest) {
        self.reply(match request {
            SupervisorRequest::Reload => "reload request sent",
            SupervisorRequest::Shutdown => "shutdown request sent",
        });
        self.args.services.supervisor.request(request);
    }

    fn stat(&mut self) {
        let stats = self.args.services.stats.snapshot();

        for (label, value) in [
            ("Messages scanned", stats.messages_scanned),
            ("Messages learned", stats.messages_learned),
            ("Connections count", stats.connections_count),
            ("Control connections count", stats.control_connections_count),
            ("Pools allocated", stats.pools_allocated),
            ("Pools freed", stats.pools_freed),
            ("Bytes allocated", stats.bytes_allocated),
            ("Memory chunks allocated", stats.chunks_allocated),
            ("Shared chunks allocated", stats.shared_chunks_allocated),
            ("Chunks freed", stats.chunks_freed),
        ] {
            self.reply(format_args!("{label}: {value}"));
        }
    }

    fn learn(&mut self, args: &[&str]) {
        let Some(scratch) = self.scratch.as_mut() else {
            return;
        };

        match learn::prepare(args, scratch, &self.args.services, self.args.max_learn_size) {
            Ok(request) => {
                tracing::debug!("Accepted {request:?}");
                let size = request.size;
                self.learn = Some(request);
                self.transition(Event::Learn(size));
            }
            Err(rejection) => {
                tracing::debug!("Rejected learn: {rejection}");
                self.reply(rejection);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::format_uptime;

    #[test]
    fn uptime_seconds() {
        assert_eq!(format_uptime(0), "0 second");
        assert_eq!(format_uptime(1), "1 second");
        assert_eq!(format_uptime(59), "59 seconds");
    }

    #[test]
    fn uptime_hours_minutes_seconds() {
        assert_eq!(format_uptime(60), "0 hour 1 minute 0 second");
        assert_eq!(format_uptime(120), "0 hour 2 minutes 0 second");
        assert_eq!(format_uptime(3661), "1 hour 1 minute 1 second");
        assert_eq!(format_uptime(7199), "1 hour 59 minutes 59 seconds");
    }

    #[test]
    fn uptime_days() {
        assert_eq!(format_uptime(7200), "0 day 2 hours 0 minute");
        assert_eq!(format_uptime(86400 + 3600 + 60), "1 day 1 hour 1 minute");
        assert_eq!(format_uptime(3 * 86400 + 5 * 3600 + 7 * 60 + 9), "3 days 5 hours 7 minutes");
    }
}
