//! Prompts and output budgets for retrieval and query expansion.

pub const RET_MAX_OUTPUT_TOKENS: usize = 300;

pub const RET_DIR_SYSTEM_PROMPT: &str = r#"You will be provided with a description of a Java method in a Java code repository, and a information list of directories or files in this repository in JSON format as follows:
{"id": <PLACEHOLDER>, "name": <PLACEHOLDER>, "similarity": <PLACEHOLDER>, "summary": <PLACEHOLDER>}
A directory contains files and subdirectories, a file contains classes, and a class contains methods.
You need to follow the steps below:
- Step 1: Calculate the probability that these directories or files contain this method indirectly.
- Step 2: Sort these directories or files according to probability from high to low, and return ids of the top 3 (if the length of information list is less than 3, return all ids in order).
- Step 3: Give a reason of about 50 words.
You need to give a JSON object that can be parsed directly as follows:
{"ids": [<PLACEHOLDER>...], "reason": <PLACEHOLDER>}"#;

pub const RET_FILE_SYSTEM_PROMPT: &str = r#"You will be provided with a description of a Java method in a Java code repository, and a information list of Java classes in this repository in JSON format as follows:
{"id": <PLACEHOLDER>, "name": <PLACEHOLDER>, "similarity": <PLACEHOLDER>, "summary": <PLACEHOLDER>}
You need to follow the steps below:
- Step 1: Calculate the probability that these classes contain this method.
- Step 2: Sort these classes according to probability from high to low, and return ids of the top 3 (if the number of classes is less than 3, return all class's ids in order).
- Step 3: Give a reason of about 50 words.
You need to give a JSON object that can be parsed directly as follows:
{"ids": [<PLACEHOLDER>...], "reason": <PLACEHOLDER>}"#;

pub const RET_CLS_SYSTEM_PROMPT: &str = r#"You will be provided with a description of a Java method in a Java code repository, as well as a information list of methods in this code repository in JSON format as follows:
{"id": <PLACEHOLDER>, "name": <PLACEHOLDER>, "signature": <PLACEHOLDER>, "similarity": <PLACEHOLDER>, "summary": <PLACEHOLDER>}
You need to infer whether the method provided with the description is one of these methods. If so, answer the id of the method. Otherwise, the answer id is -1. Regardless of whether it is found or not, give a reason of about 30 words.
You need to give a JSON object that can be parsed directly as follows:
{"id": <PLACEHOLDER>, "reason": <PLACEHOLDER>}"#;

pub const EXP_MAX_OUTPUT_TOKENS: usize = 200;

/// Fan-out when collecting reference summaries for query expansion.
pub const EXP_MAX_REF_COUNT: usize = 3;

pub const EXP_QUERY_SYSTEM_PROMPT: &str = r#"You will be provided with a query describing a Java method in a Java code repository, and a document assembled from summaries of this repository.
You need to rewrite the query into a more detailed description of the method, using the terminology that appears in the document, in about 50 words. Do not invent behavior the document does not support.
You need to give a JSON object that can be parsed directly as follows:
{"expanded_query": <PLACEHOLDER>}"#;
