//! Named routes: every place a handler can render or redirect to.

use serde::Serialize;

use crate::registration::state::WizardStep;

/// A named route of the HTTP surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "&'static str")]
pub enum Route {
    Home,
    Login,
    Logout,
    PatientRegister,
    DoctorStep(WizardStep),
    Dashboard,
    DoctorDashboard,
    PatientDashboard,
}

impl Route {
    /// URL path of the route.
    pub fn path(self) -> &'static str {
        match self {
            Self::Home => "/",
            Self::Login => "/login",
            Self::Logout => "/logout",
            Self::PatientRegister => "/register/patient",
            Self::DoctorStep(step) => step.path(),
            Self::Dashboard => "/dashboard",
            Self::DoctorDashboard => "/dashboard/doctor",
            // The patient dashboard is only ever rendered through `/dashboard`.
            Self::PatientDashboard => "/dashboard",
        }
    }

    /// Route name, used as the `view` of rendered responses.
    pub fn name(self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Login => "login",
            Self::Logout => "logout",
            Self::PatientRegister => "patient_register",
            Self::DoctorStep(step) => step.route_name(),
            Self::Dashboard => "dashboard",
            Self::DoctorDashboard => "doctor_dashboard",
            Self::PatientDashboard => "patient_dashboard",
        }
    }
}

impl From<Route> for &'static str {
    fn from(route: Route) -> Self {
        route.name()
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
