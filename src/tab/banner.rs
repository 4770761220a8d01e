use ptyhost_config::ProfileId;

/// What the banner's single button does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BannerAction {
    /// Respawn the tab's process.
    Restart,
    /// Open the profile editor for the tab's profile.
    EditProfile(ProfileId),
}

impl BannerAction {
    pub fn label(&self) -> &'static str {
        match self {
            BannerAction::Restart => "Restart",
            BannerAction::EditProfile(_) => "Edit Profile",
        }
    }
}

/// Inline notice shown above a tab's terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub title: String,
    /// Error text written into the terminal below the banner.
    pub detail: Option<String>,
    pub action: Option<BannerAction>,
}

impl Banner {
    pub fn process_exited() -> Self {
        Self {
            title: "Process Exited".to_string(),
            detail: None,
            action: Some(BannerAction::Restart),
        }
    }

    pub fn exited_from_signal(signal: i32) -> Self {
        Self {
            title: format!("Process Exited from Signal {signal}"),
            detail: None,
            action: Some(BannerAction::Restart),
        }
    }

    pub fn launch_failed(profile: ProfileId, detail: impl Into<String>) -> Self {
        Self {
            title: "Failed to launch terminal".to_string(),
            detail: Some(detail.into()),
            action: Some(BannerAction::EditProfile(profile)),
        }
    }

    pub fn container_missing(profile: ProfileId, container: &str) -> Self {
        Self {
            title: format!("Cannot locate container “{container}”"),
            detail: None,
            action: Some(BannerAction::EditProfile(profile)),
        }
    }

    pub fn pty_failed() -> Self {
        Self {
            title: "Failed to create pseudo terminal device".to_string(),
            detail: None,
            action: None,
        }
    }
}
