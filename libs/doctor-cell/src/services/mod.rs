pub mod availability;
pub mod repository;

pub use availability::{AvailabilityAudience, AvailabilityService};
pub use repository::{AvailabilityRepository, InMemoryAvailabilityRepository, SupabaseAvailabilityRepository};
