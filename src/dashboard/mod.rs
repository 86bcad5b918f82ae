//! Dashboard routing: sends each identity to the view for its profile kind.

pub mod routes;

use crate::accounts::{DoctorProfile, Identity, ProfileKind};
use crate::error::DatabaseError;
use crate::store::Database;

pub use routes::dashboard_routes;

/// Where `/dashboard` sends an identity.
#[derive(Debug, Clone)]
pub enum DashboardView {
    Patient,
    Doctor(DoctorProfile),
    /// No profile of either kind.
    Home,
}

impl From<ProfileKind> for DashboardView {
    fn from(kind: ProfileKind) -> Self {
        match kind {
            ProfileKind::Patient(_) => Self::Patient,
            ProfileKind::Doctor(profile) => Self::Doctor(profile),
            ProfileKind::None => Self::Home,
        }
    }
}

/// Resolve the dashboard for an identity. A patient profile wins if both exist.
pub async fn route_dashboard(
    db: &dyn Database,
    identity: &Identity,
) -> Result<DashboardView, DatabaseError> {
    let kind = db.get_profile_kind(identity.id).await?;
    Ok(DashboardView::from(kind))
}
