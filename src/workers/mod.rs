pub mod scheduler_worker;
