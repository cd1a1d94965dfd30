pub mod policy;

pub use policy::{AutonomyLevel, RiskLevel, SecurityPolicy, ValidationResult};
