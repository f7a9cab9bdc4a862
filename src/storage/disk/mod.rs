mod disk_manager;
mod disk_scheduler;
mod page_store;

pub use disk_manager::*;
pub use disk_scheduler::*;
pub use page_store::*;
