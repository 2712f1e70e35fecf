pub mod registry;
pub mod scheduling;
pub mod store;
pub mod supabase_store;
pub mod workflow;

pub use registry::{Reservation, SlotRegistry};
pub use scheduling::SchedulingService;
pub use store::{AppointmentStore, InMemoryAppointmentStore, StoreAudience};
pub use supabase_store::SupabaseAppointmentStore;
pub use workflow::StatusWorkflow;
