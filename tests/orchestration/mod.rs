mod concurrency_test;
mod deployment_test;
mod reconciliation_test;
mod status_intake_test;
mod unreachable_test;
