use super::test_helpers::*;
use super::*;
use crate::types::{
    Credentials, DownloadRequest, FailureReason, InputPrompt, Phase, TaskState, TaskWarning,
};
