//! What happens to a tab once its process is gone.

use std::time::Duration;

use ptyhost_config::ExitAction;

use super::banner::Banner;
use super::state::TabState;
use crate::connection::WaitStatus;

/// Exits faster than this without any key pressed look like a broken launch.
pub const QUICK_EXIT: Duration = Duration::from_millis(500);

/// Inputs to the exit policy.
#[derive(Debug, Clone, Copy)]
pub struct ExitContext {
    pub status: WaitStatus,
    /// The tab is being torn down; nothing should be shown or restarted.
    pub forced_exit: bool,
    /// The tab runs a one-shot command rather than a profile's program.
    pub has_command: bool,
    /// Time between the spawn succeeding and the exit arriving.
    pub elapsed: Duration,
    pub has_pressed_key: bool,
    pub action: ExitAction,
}

/// Follow-up the supervisor performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitDecision {
    Nothing,
    ShowBanner(Banner),
    Respawn,
    Close,
}

/// State the tab lands in plus the follow-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitOutcome {
    pub state: TabState,
    pub decision: ExitDecision,
}

pub fn decide_exit(ctx: &ExitContext) -> ExitOutcome {
    let state = if ctx.status.success() {
        TabState::Exited
    } else {
        TabState::Failed
    };

    if ctx.forced_exit {
        return ExitOutcome {
            state,
            decision: ExitDecision::Nothing,
        };
    }

    if ctx.status.signaled() {
        return ExitOutcome {
            state,
            decision: ExitDecision::ShowBanner(Banner::exited_from_signal(ctx.status.term_sig())),
        };
    }

    let mut action = ctx.action;
    if ctx.has_command {
        action = ExitAction::Close;
    }
    if ctx.elapsed < QUICK_EXIT && !ctx.has_pressed_key {
        action = ExitAction::None;
    }

    let decision = match action {
        ExitAction::Restart => ExitDecision::Respawn,
        ExitAction::Close => ExitDecision::Close,
        ExitAction::None => ExitDecision::ShowBanner(Banner::process_exited()),
    };
    ExitOutcome { state, decision }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(status: WaitStatus, action: ExitAction) -> ExitContext {
        ExitContext {
            status,
            forced_exit: false,
            has_command: false,
            elapsed: Duration::from_secs(30),
            has_pressed_key: true,
            action,
        }
    }

    #[test]
    fn test_clean_exit_applies_profile_action() {
        let out = decide_exit(&ctx(WaitStatus::from_exit_code(0), ExitAction::Restart));
        assert_eq!(out.state, TabState::Exited);
        assert_eq!(out.decision, ExitDecision::Respawn);

        let out = decide_exit(&ctx(WaitStatus::from_exit_code(0), ExitAction::Close));
        assert_eq!(out.decision, ExitDecision::Close);

        let out = decide_exit(&ctx(WaitStatus::from_exit_code(0), ExitAction::None));
        assert_eq!(out.decision, ExitDecision::ShowBanner(Banner::process_exited()));
    }

    #[test]
    fn test_nonzero_exit_fails_tab() {
        let out = decide_exit(&ctx(WaitStatus::from_exit_code(1), ExitAction::Close));
        assert_eq!(out.state, TabState::Failed);
        assert_eq!(out.decision, ExitDecision::Close);
    }

    #[test]
    fn test_signal_never_restarts_or_closes() {
        for action in ExitAction::all() {
            let mut c = ctx(WaitStatus::from_signal(9), *action);
            c.has_command = true;
            let out = decide_exit(&c);
            assert_eq!(out.state, TabState::Failed);
            assert_eq!(
                out.decision,
                ExitDecision::ShowBanner(Banner::exited_from_signal(9))
            );
        }
    }

    #[test]
    fn test_one_shot_command_closes() {
        let mut c = ctx(WaitStatus::from_exit_code(0), ExitAction::Restart);
        c.has_command = true;
        assert_eq!(decide_exit(&c).decision, ExitDecision::Close);
    }

    #[test]
    fn test_quick_exit_without_input_shows_banner() {
        let mut c = ctx(WaitStatus::from_exit_code(0), ExitAction::Restart);
        c.elapsed = Duration::from_millis(120);
        c.has_pressed_key = false;
        assert_eq!(
            decide_exit(&c).decision,
            ExitDecision::ShowBanner(Banner::process_exited())
        );

        c.has_pressed_key = true;
        assert_eq!(decide_exit(&c).decision, ExitDecision::Respawn);
    }

    #[test]
    fn test_forced_exit_does_nothing() {
        let mut c = ctx(WaitStatus::from_signal(1), ExitAction::Restart);
        c.forced_exit = true;
        let out = decide_exit(&c);
        assert_eq!(out.state, TabState::Failed);
        assert_eq!(out.decision, ExitDecision::Nothing);
    }
}
