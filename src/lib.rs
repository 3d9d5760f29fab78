pub mod accumulate;
pub mod analyzer;
pub mod cli;
pub mod collected;
pub mod collector;
pub mod github;
pub mod gitlab;
pub mod missing_permissions;
pub mod pagination;
pub mod permissions;
pub mod policy;
pub mod reporter;
pub mod retry;
pub mod run_context;
pub mod scm_error;
pub mod scorecard;
pub mod skipper;
pub mod task_group;
