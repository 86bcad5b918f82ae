//! Identities and the profile records attached to them.

pub mod model;

pub use model::{
    DoctorProfile, Identity, OnlineClinicDetail, PatientProfile, PracticeDetail, ProfileKind,
    Session, Specialization,
};
