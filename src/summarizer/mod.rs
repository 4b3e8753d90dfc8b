//! Bottom-up summarization of a repository tree.
//!
//! Methods are summarized from their source bodies, classes from their
//! methods, files from their classes, and directories from their
//! subdirectories and files. Each level feeds the usable summaries of the
//! level below into the prompt context, dropping later children when the
//! token budget fills up.

pub mod prompts;

use std::time::Instant;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::Serialize;

use crate::backend::GenerationBackend;
use crate::tree::{self, ClassNode, DirNode, FileNode, MethodNode, RepoTree, Summary};

/// Tokens reserved for chat message framing on top of prompt and context.
const RESERVED_TOKENS: usize = 5;

const FILE_CLASS_HEADER: &str =
    "The following is the class or interface or enum in the file and the corresponding summary:\n";
const DIR_SUBDIR_HEADER: &str =
    "The following is the subdirectory in the directory and the corresponding summary:\n";
const DIR_FILE_HEADER: &str =
    "The following is the file in the directory and the corresponding summary:\n";

/// Counters reported after a summarization run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SummaryStats {
    /// Nodes that received a generated summary.
    pub summarized: usize,
    /// Nodes skipped for lack of usable context.
    pub no_context: usize,
    /// Nodes whose generation call failed.
    pub failed: usize,
    /// Generation API calls made.
    pub api_calls: usize,
    /// Total tokens reported by the backend across all calls.
    pub token_used: usize,
}

/// Walks a [`RepoTree`] bottom-up and fills in every node's summary.
///
/// Generation failures never abort the run; the affected node is marked
/// [`Summary::Failed`] and its parents summarize without it.
pub struct Summarizer<'a, G> {
    backend: &'a G,
    stats: SummaryStats,
}

impl<'a, G: GenerationBackend> Summarizer<'a, G> {
    pub fn new(backend: &'a G) -> Self {
        Self {
            backend,
            stats: SummaryStats::default(),
        }
    }

    /// Whether `system` plus `user` leaves room for `max_output_tokens` of
    /// output within the backend's context window.
    fn fits(&self, system: &str, user: &str, max_output_tokens: usize) -> bool {
        let budget = self
            .backend
            .max_tokens()
            .saturating_sub(max_output_tokens + RESERVED_TOKENS);
        self.backend.encode_len(system) + self.backend.encode_len(user) <= budget
    }

    /// Truncate `context` to the longest prefix that fits the token budget.
    /// The prompt is never truncated.
    fn truncate_context(
        &self,
        node_id: u32,
        system: &str,
        context: &str,
        max_output_tokens: usize,
    ) -> String {
        if self.fits(system, context, max_output_tokens) {
            return context.to_string();
        }

        let boundaries: Vec<usize> = context
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(context.len()))
            .collect();

        let mut lo = 0;
        let mut hi = boundaries.len() - 1;
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if self.fits(system, &context[..boundaries[mid]], max_output_tokens) {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        let truncated = &context[..boundaries[lo]];
        tracing::warn!(
            node_id,
            from_chars = context.len(),
            to_chars = truncated.len(),
            "Context exceeds the token budget, truncating"
        );
        truncated.to_string()
    }

    /// One generation call; failures become [`Summary::Failed`].
    async fn generate_one(
        &mut self,
        node_id: u32,
        system: &str,
        user: &str,
        max_output_tokens: usize,
    ) -> Summary {
        self.stats.api_calls += 1;
        match self.backend.generate(system, user, max_output_tokens).await {
            Ok(generation) => {
                self.stats.token_used += generation.total_tokens;
                self.stats.summarized += 1;
                Summary::Text(generation.text.trim().to_string())
            }
            Err(e) => {
                self.stats.failed += 1;
                tracing::error!(node_id, "Summary generation failed: {e:#}");
                Summary::Failed
            }
        }
    }

    /// Summarize methods from their bodies, batching calls up to the
    /// backend's batch width and running further groups as sequential
    /// rounds. Bodiless methods are marked [`Summary::Missing`] without a
    /// call.
    pub async fn summarize_methods(&mut self, methods: &mut [MethodNode]) {
        let mut pending = Vec::new();
        for (idx, method) in methods.iter_mut().enumerate() {
            if method.body.is_empty() {
                method.summary = Summary::Missing;
                self.stats.no_context += 1;
                tracing::debug!(node_id = method.id, name = %method.name, "Method has no body");
            } else {
                pending.push(idx);
            }
        }

        let inputs: Vec<(usize, String)> = pending
            .into_iter()
            .map(|idx| {
                let method = &methods[idx];
                let context = format!("{}{}", method.signature, method.body);
                let input = self.truncate_context(
                    method.id,
                    prompts::SUM_METHOD_PROMPT,
                    &context,
                    prompts::SUM_METHOD_MAX_OUTPUT,
                );
                (idx, input)
            })
            .collect();

        let backend = self.backend;
        for chunk in inputs.chunks(backend.max_batch_size().max(1)) {
            let calls = chunk.iter().map(|(_, input)| {
                backend.generate(
                    prompts::SUM_METHOD_PROMPT,
                    input,
                    prompts::SUM_METHOD_MAX_OUTPUT,
                )
            });
            let results = join_all(calls).await;

            for ((idx, _), result) in chunk.iter().zip(results) {
                self.stats.api_calls += 1;
                match result {
                    Ok(generation) => {
                        self.stats.token_used += generation.total_tokens;
                        self.stats.summarized += 1;
                        methods[*idx].summary = Summary::Text(generation.text.trim().to_string());
                    }
                    Err(e) => {
                        self.stats.failed += 1;
                        tracing::error!(
                            node_id = methods[*idx].id,
                            "Method summary generation failed: {e:#}"
                        );
                        methods[*idx].summary = Summary::Failed;
                    }
                }
            }
        }
    }

    /// Summarize a class from its method signatures and summaries.
    pub async fn summarize_class(&mut self, cls: &mut ClassNode) {
        self.summarize_methods(&mut cls.methods).await;

        let mut context = format!("{} {{\n", cls.signature);
        let mut valid = 0;

        for (idx, method) in cls.methods.iter().enumerate() {
            let Some(text) = method.summary.usable() else {
                continue;
            };
            let line = format!("\t{}; // {}\n", method.signature, text);
            if !self.fits(
                prompts::SUM_CLS_PROMPT,
                &format!("{context}{line}"),
                prompts::SUM_CLS_MAX_OUTPUT,
            ) {
                tracing::warn!(
                    node_id = cls.id,
                    dropped = cls.methods.len() - idx,
                    "Class context full, dropping remaining methods"
                );
                break;
            }
            context.push_str(&line);
            valid += 1;
        }

        if valid == 0 {
            cls.summary = Summary::Missing;
            self.stats.no_context += 1;
            return;
        }

        context.push('}');
        let input = self.truncate_context(
            cls.id,
            prompts::SUM_CLS_PROMPT,
            &context,
            prompts::SUM_CLS_MAX_OUTPUT,
        );
        cls.summary = self
            .generate_one(
                cls.id,
                prompts::SUM_CLS_PROMPT,
                &input,
                prompts::SUM_CLS_MAX_OUTPUT,
            )
            .await;
    }

    /// Summarize a file from its class summaries.
    pub async fn summarize_file(&mut self, file: &mut FileNode) {
        for cls in &mut file.classes {
            self.summarize_class(cls).await;
        }

        let mut context = format!("File name: {}.\n", file.name);
        let mut valid = 0;

        if !file.classes.is_empty() {
            context.push_str(FILE_CLASS_HEADER);
            for (idx, cls) in file.classes.iter().enumerate() {
                let Some(text) = cls.summary.usable() else {
                    continue;
                };
                let line = format!("\t- The summary of the class named {}: {}\n", cls.name, text);
                if !self.fits(
                    prompts::SUM_FILE_PROMPT,
                    &format!("{context}{line}"),
                    prompts::SUM_FILE_MAX_OUTPUT,
                ) {
                    tracing::warn!(
                        node_id = file.id,
                        dropped = file.classes.len() - idx,
                        "File context full, dropping remaining classes"
                    );
                    break;
                }
                context.push_str(&line);
                valid += 1;
            }
        }

        if valid == 0 {
            file.summary = Summary::Missing;
            self.stats.no_context += 1;
            return;
        }

        let input = self.truncate_context(
            file.id,
            prompts::SUM_FILE_PROMPT,
            &context,
            prompts::SUM_FILE_MAX_OUTPUT,
        );
        file.summary = self
            .generate_one(
                file.id,
                prompts::SUM_FILE_PROMPT,
                &input,
                prompts::SUM_FILE_MAX_OUTPUT,
            )
            .await;
    }

    /// Summarize a directory from its subdirectory and file summaries,
    /// recursing depth-first.
    pub fn summarize_dir<'b>(&'b mut self, dir: &'b mut DirNode) -> BoxFuture<'b, ()> {
        async move {
            for sub in &mut dir.subdirectories {
                self.summarize_dir(sub).await;
            }
            for file in &mut dir.files {
                self.summarize_file(file).await;
            }

            let mut context = format!("Directory name: {}.\n", dir.name);
            let mut valid = 0;

            if !dir.subdirectories.is_empty() {
                context.push_str(DIR_SUBDIR_HEADER);
                for (idx, sub) in dir.subdirectories.iter().enumerate() {
                    let Some(text) = sub.summary.usable() else {
                        continue;
                    };
                    let line =
                        format!("\t- The summary of the directory named {}: {}\n", sub.name, text);
                    if !self.fits(
                        prompts::SUM_DIR_PROMPT,
                        &format!("{context}{line}"),
                        prompts::SUM_DIR_MAX_OUTPUT,
                    ) {
                        tracing::warn!(
                            node_id = dir.id,
                            dropped = dir.subdirectories.len() - idx,
                            "Directory context full, dropping remaining subdirectories"
                        );
                        break;
                    }
                    context.push_str(&line);
                    valid += 1;
                }
            }

            if !dir.files.is_empty() {
                context.push_str(DIR_FILE_HEADER);
                for (idx, file) in dir.files.iter().enumerate() {
                    let Some(text) = file.summary.usable() else {
                        continue;
                    };
                    let line =
                        format!("\t- The summary of the file named {}: {}\n", file.name, text);
                    if !self.fits(
                        prompts::SUM_DIR_PROMPT,
                        &format!("{context}{line}"),
                        prompts::SUM_DIR_MAX_OUTPUT,
                    ) {
                        tracing::warn!(
                            node_id = dir.id,
                            dropped = dir.files.len() - idx,
                            "Directory context full, dropping remaining files"
                        );
                        break;
                    }
                    context.push_str(&line);
                    valid += 1;
                }
            }

            if valid == 0 {
                dir.summary = Summary::Missing;
                self.stats.no_context += 1;
                return;
            }

            let input = self.truncate_context(
                dir.id,
                prompts::SUM_DIR_PROMPT,
                &context,
                prompts::SUM_DIR_MAX_OUTPUT,
            );
            dir.summary = self
                .generate_one(
                    dir.id,
                    prompts::SUM_DIR_PROMPT,
                    &input,
                    prompts::SUM_DIR_MAX_OUTPUT,
                )
                .await;
        }
        .boxed()
    }

    /// Summarize a whole tree in place: collapse wrapper directories, then
    /// fill every summary bottom-up. Returns the run's counters.
    pub async fn summarize_repo(mut self, repo: &mut RepoTree) -> SummaryStats {
        tree::collapse(&mut repo.main_directory);

        let started = Instant::now();
        self.summarize_dir(&mut repo.main_directory).await;

        tracing::info!(
            summarized = self.stats.summarized,
            no_context = self.stats.no_context,
            failed = self.stats.failed,
            api_calls = self.stats.api_calls,
            token_used = self.stats.token_used,
            elapsed_secs = started.elapsed().as_secs(),
            "Summarization complete"
        );

        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Generation;
    use anyhow::Result;
    use std::sync::Mutex;

    /// Counts tokens as whitespace-separated words and records every call.
    struct RecordingBackend {
        max_tokens: usize,
        reply: &'static str,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl RecordingBackend {
        fn new(max_tokens: usize, reply: &'static str) -> Self {
            Self {
                max_tokens,
                reply,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl GenerationBackend for RecordingBackend {
        fn encode_len(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }

        fn max_tokens(&self) -> usize {
            self.max_tokens
        }

        fn max_batch_size(&self) -> usize {
            2
        }

        async fn generate(
            &self,
            system: &str,
            user: &str,
            _max_output_tokens: usize,
        ) -> Result<Generation> {
            self.calls
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string()));
            Ok(Generation {
                text: self.reply.to_string(),
                total_tokens: 10,
            })
        }
    }

    struct FailingBackend;

    impl GenerationBackend for FailingBackend {
        fn encode_len(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }

        fn max_tokens(&self) -> usize {
            10_000
        }

        fn max_batch_size(&self) -> usize {
            4
        }

        async fn generate(
            &self,
            _system: &str,
            _user: &str,
            _max_output_tokens: usize,
        ) -> Result<Generation> {
            anyhow::bail!("backend unavailable")
        }
    }

    fn method(id: u32, name: &str, body: &str) -> MethodNode {
        MethodNode {
            id,
            name: name.to_string(),
            signature: format!("void {}()", name),
            body: body.to_string(),
            summary: Summary::Missing,
        }
    }

    #[tokio::test]
    async fn test_bodiless_method_gets_no_call() {
        let backend = RecordingBackend::new(10_000, "does things");
        let mut summarizer = Summarizer::new(&backend);

        let mut methods = vec![method(1, "a", "")];
        summarizer.summarize_methods(&mut methods).await;

        assert_eq!(methods[0].summary, Summary::Missing);
        assert!(backend.calls().is_empty());
        assert_eq!(summarizer.stats.no_context, 1);
        assert_eq!(summarizer.stats.api_calls, 0);
    }

    #[tokio::test]
    async fn test_methods_batched_in_rounds() {
        let backend = RecordingBackend::new(10_000, "does things");
        let mut summarizer = Summarizer::new(&backend);

        let mut methods: Vec<MethodNode> = (1..=5)
            .map(|i| method(i, &format!("m{i}"), "{ return; }"))
            .collect();
        summarizer.summarize_methods(&mut methods).await;

        for m in &methods {
            assert_eq!(m.summary, Summary::Text("does things".to_string()));
        }
        assert_eq!(backend.calls().len(), 5);
        assert_eq!(summarizer.stats.api_calls, 5);
        assert_eq!(summarizer.stats.summarized, 5);
        assert_eq!(summarizer.stats.token_used, 50);
    }

    #[tokio::test]
    async fn test_failed_generation_marks_node() {
        let backend = FailingBackend;
        let mut summarizer = Summarizer::new(&backend);

        let mut methods = vec![method(1, "a", "{ return; }")];
        summarizer.summarize_methods(&mut methods).await;

        assert_eq!(methods[0].summary, Summary::Failed);
        assert_eq!(summarizer.stats.failed, 1);
    }

    #[tokio::test]
    async fn test_class_without_usable_methods_is_missing() {
        let backend = RecordingBackend::new(10_000, "does things");
        let mut summarizer = Summarizer::new(&backend);

        let mut cls = ClassNode {
            id: 1,
            name: "A".to_string(),
            signature: "public class A".to_string(),
            methods: vec![method(2, "a", ""), method(3, "b", "")],
            summary: Summary::Missing,
        };
        summarizer.summarize_class(&mut cls).await;

        assert_eq!(cls.summary, Summary::Missing);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_class_context_drops_later_methods_on_budget() {
        // Budget sized so the first method line fits but the second does
        // not (word-count tokens, 128 - 100 output - 5 reserved).
        let backend = RecordingBackend::new(128, "does things");
        let mut summarizer = Summarizer::new(&backend);

        let mut cls = ClassNode {
            id: 1,
            name: "A".to_string(),
            signature: "public class A".to_string(),
            methods: vec![method(2, "a", "{ return; }"), method(3, "b", "{ return; }")],
            summary: Summary::Missing,
        };
        summarizer.summarize_class(&mut cls).await;

        let calls = backend.calls();
        let (_, class_input) = calls.last().unwrap();
        assert!(class_input.contains("void a();"));
        assert!(!class_input.contains("void b();"));
        assert_eq!(cls.summary, Summary::Text("does things".to_string()));
    }

    #[tokio::test]
    async fn test_file_excludes_unusable_class_summaries() {
        let backend = RecordingBackend::new(10_000, "does things");
        let mut summarizer = Summarizer::new(&backend);

        let mut file = FileNode {
            id: 1,
            name: "A.java".to_string(),
            classes: vec![
                ClassNode {
                    id: 2,
                    name: "A".to_string(),
                    signature: "public class A".to_string(),
                    methods: vec![method(3, "a", "{ return; }")],
                    summary: Summary::Missing,
                },
                ClassNode {
                    id: 4,
                    name: "B".to_string(),
                    signature: "public class B".to_string(),
                    methods: vec![method(5, "b", "")],
                    summary: Summary::Missing,
                },
            ],
            summary: Summary::Missing,
        };
        summarizer.summarize_file(&mut file).await;

        let calls = backend.calls();
        let (_, file_input) = calls.last().unwrap();
        assert!(file_input.contains("the class named A"));
        assert!(!file_input.contains("the class named B"));
        assert_eq!(file.summary, Summary::Text("does things".to_string()));
    }

    #[tokio::test]
    async fn test_truncate_context_keeps_prompt_and_prefix() {
        let backend = RecordingBackend::new(80, "does things");
        let summarizer = Summarizer::new(&backend);

        let context = "alpha beta gamma delta epsilon zeta eta theta iota kappa \
                       lambda mu nu xi omicron pi rho sigma tau upsilon";
        let truncated = summarizer.truncate_context(
            7,
            prompts::SUM_METHOD_PROMPT,
            context,
            prompts::SUM_METHOD_MAX_OUTPUT,
        );

        assert!(truncated.len() < context.len());
        assert!(context.starts_with(&truncated));
        assert!(summarizer.fits(
            prompts::SUM_METHOD_PROMPT,
            &truncated,
            prompts::SUM_METHOD_MAX_OUTPUT
        ));
    }

    #[tokio::test]
    async fn test_summarize_repo_fills_all_levels() {
        let backend = RecordingBackend::new(10_000, "does things");
        let summarizer = Summarizer::new(&backend);

        let mut repo = RepoTree {
            main_directory: DirNode {
                id: 0,
                name: "root".to_string(),
                subdirectories: vec![DirNode {
                    id: 1,
                    name: "wrapper".to_string(),
                    subdirectories: vec![DirNode {
                        id: 2,
                        name: "core".to_string(),
                        subdirectories: vec![],
                        files: vec![FileNode {
                            id: 3,
                            name: "A.java".to_string(),
                            classes: vec![ClassNode {
                                id: 4,
                                name: "A".to_string(),
                                signature: "public class A".to_string(),
                                methods: vec![method(5, "a", "{ return; }")],
                                summary: Summary::Missing,
                            }],
                            summary: Summary::Missing,
                        }],
                        summary: Summary::Missing,
                    }],
                    files: vec![],
                    summary: Summary::Missing,
                }],
                files: vec![FileNode {
                    id: 6,
                    name: "Main.java".to_string(),
                    classes: vec![],
                    summary: Summary::Missing,
                }],
                summary: Summary::Missing,
            },
            node_count: 7,
        };

        let stats = summarizer.summarize_repo(&mut repo).await;

        // wrapper/core folded into one summarization unit
        assert_eq!(repo.main_directory.subdirectories[0].name, "wrapper/core");
        assert!(repo.main_directory.summary.usable().is_some());
        assert!(repo.main_directory.subdirectories[0]
            .summary
            .usable()
            .is_some());
        // Main.java has no classes, so it contributes nothing
        assert_eq!(repo.main_directory.files[0].summary, Summary::Missing);
        // method + class + file + collapsed dir + root
        assert_eq!(stats.summarized, 5);
        assert_eq!(stats.no_context, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_summarization_is_deterministic() {
        let backend = RecordingBackend::new(10_000, "does things");

        let mut cls = ClassNode {
            id: 1,
            name: "A".to_string(),
            signature: "public class A".to_string(),
            methods: vec![method(2, "a", "{ return; }"), method(3, "b", "")],
            summary: Summary::Missing,
        };
        let mut again = cls.clone();

        Summarizer::new(&backend).summarize_class(&mut cls).await;
        Summarizer::new(&backend).summarize_class(&mut again).await;

        assert_eq!(
            serde_json::to_string(&cls).unwrap(),
            serde_json::to_string(&again).unwrap()
        );
    }
}
