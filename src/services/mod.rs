pub mod calendar;
pub mod conflict;
pub mod init;
pub mod lifecycle;
pub mod matching;
pub mod notifications;
pub mod payments;
pub mod rewards;
pub mod slots;
