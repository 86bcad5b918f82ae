//! Doctor registration state machine: which wizard step a doctor may enter.
//!
//! The only durable cursor is `DoctorProfile::registration_step`. Everything
//! here is pure so the gating rules can be tested without a database.

use serde::{Deserialize, Serialize};

use crate::accounts::DoctorProfile;

/// The five steps of the doctor registration wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    Account,
    Specializations,
    Practice,
    OnlineClinic,
    ProfilePicture,
}

impl WizardStep {
    /// All steps in order.
    pub const ALL: [WizardStep; 5] = [
        Self::Account,
        Self::Specializations,
        Self::Practice,
        Self::OnlineClinic,
        Self::ProfilePicture,
    ];

    /// 1-based step index, as stored in `registration_step`.
    pub fn index(self) -> i64 {
        match self {
            Self::Account => 1,
            Self::Specializations => 2,
            Self::Practice => 3,
            Self::OnlineClinic => 4,
            Self::ProfilePicture => 5,
        }
    }

    /// Step for a 1-based index.
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            1 => Some(Self::Account),
            2 => Some(Self::Specializations),
            3 => Some(Self::Practice),
            4 => Some(Self::OnlineClinic),
            5 => Some(Self::ProfilePicture),
            _ => None,
        }
    }

    /// The step after this one, if any.
    pub fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    pub fn is_last(self) -> bool {
        self.next().is_none()
    }

    pub fn path(self) -> &'static str {
        match self {
            Self::Account => "/register/doctor/step1",
            Self::Specializations => "/register/doctor/step2",
            Self::Practice => "/register/doctor/step3",
            Self::OnlineClinic => "/register/doctor/step4",
            Self::ProfilePicture => "/register/doctor/step5",
        }
    }

    pub fn route_name(self) -> &'static str {
        match self {
            Self::Account => "doctor_register_step1",
            Self::Specializations => "doctor_register_step2",
            Self::Practice => "doctor_register_step3",
            Self::OnlineClinic => "doctor_register_step4",
            Self::ProfilePicture => "doctor_register_step5",
        }
    }
}

impl std::fmt::Display for WizardStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step{}", self.index())
    }
}

/// Where a doctor stands in the wizard.
///
/// Progresses linearly: NoProfile → Step1Done → Step2Done → Step3Done →
/// Step4Done → Complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    #[default]
    NoProfile,
    Step1Done,
    Step2Done,
    Step3Done,
    Step4Done,
    Complete,
}

/// Result of checking whether a step may be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Allow,
    Redirect(WizardStep),
}

impl RegistrationState {
    /// Number of wizard steps completed.
    pub fn completed_steps(self) -> i64 {
        match self {
            Self::NoProfile => 0,
            Self::Step1Done => 1,
            Self::Step2Done => 2,
            Self::Step3Done => 3,
            Self::Step4Done => 4,
            Self::Complete => 5,
        }
    }

    /// State of an existing profile with the given stored cursor.
    ///
    /// A profile only exists once step 1 is done, so cursors below 1 read as
    /// `Step1Done`; cursors above 5 read as `Complete`.
    pub fn from_cursor(registration_step: i64) -> Self {
        match registration_step {
            i64::MIN..=1 => Self::Step1Done,
            2 => Self::Step2Done,
            3 => Self::Step3Done,
            4 => Self::Step4Done,
            _ => Self::Complete,
        }
    }

    /// State for an identity's (possibly missing) doctor profile.
    pub fn for_profile(profile: Option<&DoctorProfile>) -> Self {
        match profile {
            Some(p) => Self::from_cursor(p.registration_step),
            None => Self::NoProfile,
        }
    }

    /// Whether the wizard is done.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Decide whether `requested` may be entered from this state.
    ///
    /// Step 1 is always open. Any later step needs a profile and its
    /// predecessor completed; otherwise the earliest unmet step is returned.
    pub fn gate(self, requested: WizardStep) -> Gate {
        if requested == WizardStep::Account {
            return Gate::Allow;
        }
        if self == Self::NoProfile {
            return Gate::Redirect(WizardStep::Account);
        }
        let done = self.completed_steps();
        if done >= requested.index() - 1 {
            Gate::Allow
        } else {
            Gate::Redirect(WizardStep::from_index(done + 1).unwrap_or(WizardStep::Account))
        }
    }

    /// State after `validated` has been successfully persisted.
    ///
    /// Never moves backward, and ignores steps the gate would not have let
    /// through, so the result never claims more steps than were completed.
    pub fn next(self, validated: WizardStep) -> Self {
        if self.gate(validated) != Gate::Allow {
            return self;
        }
        let reached = Self::from_cursor(validated.index());
        self.max(reached)
    }
}

impl std::fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoProfile => "no_profile",
            Self::Step1Done => "step1_done",
            Self::Step2Done => "step2_done",
            Self::Step3Done => "step3_done",
            Self::Step4Done => "step4_done",
            Self::Complete => "complete",
        };
        write!(f, "{s}")
    }
}
