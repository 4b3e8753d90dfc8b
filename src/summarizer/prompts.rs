//! Prompts and output budgets for each summarization level.

pub const SUM_METHOD_PROMPT: &str = "Summarize the Java method below in about 30 words.";
pub const SUM_METHOD_MAX_OUTPUT: usize = 60;

pub const SUM_CLS_PROMPT: &str =
    "Summarize the Java class below in about 50 words, don't include examples and details.";
pub const SUM_CLS_MAX_OUTPUT: usize = 100;

pub const SUM_FILE_PROMPT: &str =
    "Summarize the file below in about 50 words, don't include examples and details.";
pub const SUM_FILE_MAX_OUTPUT: usize = 100;

pub const SUM_DIR_PROMPT: &str =
    "Summarize the directory below in about 100 words, don't include examples and details.";
pub const SUM_DIR_MAX_OUTPUT: usize = 200;
