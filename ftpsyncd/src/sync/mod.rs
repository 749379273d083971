pub mod backoff;
pub mod diff;
pub mod engine;
pub mod paths;
pub mod queue;
pub mod remote;
pub mod scan;
pub mod scheduler;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_support;
