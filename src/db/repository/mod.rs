pub mod appointment;
pub mod audit;
pub mod availability;
pub mod business_hours;
pub mod location;
pub mod staff;
pub mod transaction;

pub use appointment::AppointmentRepository;
pub use audit::AuditLogRepository;
pub use availability::AvailabilityRepository;
pub use business_hours::BusinessHoursRepository;
pub use location::LocationRepository;
pub use staff::StaffRepository;
pub use transaction::TransactionRepository;
