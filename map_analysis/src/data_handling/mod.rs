pub mod aggregate;
pub mod features;
pub mod plate_profile;
