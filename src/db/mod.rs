pub mod models;
pub mod repository;

pub use repository::{
    AppointmentRepository, AuditLogRepository, AvailabilityRepository, BusinessHoursRepository,
    LocationRepository, StaffRepository, TransactionRepository,
};
