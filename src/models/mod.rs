pub mod identity;
pub mod registration;
pub mod training;

pub use identity::{Session, User};
pub use registration::{NewRegistration, Registration, RegistrationStatus, RegistrationUpdate};
pub use training::{NewTraining, Training, TrainingUpdate};
