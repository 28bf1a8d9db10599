pub mod audit_log;
pub mod course;
pub mod enrollment;
pub mod order;
pub mod refund;
pub mod status;
pub mod user;
