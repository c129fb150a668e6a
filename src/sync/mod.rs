pub mod scheduler;

pub use scheduler::ImportScheduler;
