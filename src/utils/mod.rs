pub(crate) mod async_task;
pub(crate) mod backoff;
pub(crate) mod path;

#[cfg(test)]
mod async_task_test;
#[cfg(test)]
mod backoff_test;
