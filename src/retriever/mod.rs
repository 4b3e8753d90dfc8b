//! Hierarchical method retrieval over a summarized repository tree.
//!
//! Descends directory → file → class, asking the model to pick among
//! similarity-ranked children at each level and backtracking through its
//! top choices when a branch comes up empty. A second attempt with an
//! expanded query runs only when the first finds nothing without erroring.

pub mod decision;
pub mod expander;
pub mod prompts;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;

use crate::backend::{GenerationBackend, SimilarityBackend};
use crate::rank::{self, Candidate, RankedCandidate};
use crate::tree::{ClassNode, DirNode, FileNode, RepoTree};
use crate::INPUT_SEPARATOR;

use prompts::{
    RET_CLS_SYSTEM_PROMPT, RET_DIR_SYSTEM_PROMPT, RET_FILE_SYSTEM_PROMPT, RET_MAX_OUTPUT_TOKENS,
};

/// How many of the model's ranked choices are tried before a level gives up.
pub const MAX_BACKTRACK_COUNT: usize = 2;

/// Per-level caps on how many ranked candidates the decision prompt sees.
const DIR_MAX_CANDIDATES: usize = 10;
const FILE_MAX_CANDIDATES: usize = 15;
const CLS_MAX_CANDIDATES: usize = 20;

/// Whether `system` plus `user` leaves room for the output budget.
pub(crate) fn fits<G: GenerationBackend>(
    backend: &G,
    system: &str,
    user: &str,
    max_output_tokens: usize,
) -> bool {
    backend.encode_len(system) + backend.encode_len(user)
        <= backend.max_tokens().saturating_sub(max_output_tokens)
}

/// Final outcome of one `retrieve` call.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub found: bool,
    pub error: bool,
    pub is_query_expanded: bool,
    /// Node names root-first: the result path when found, otherwise the
    /// most probable path walked on the first try.
    pub path: Vec<String>,
    /// Decision calls made.
    pub ret_times: usize,
    /// Tokens spent across decision and expansion calls.
    pub token_used: usize,
}

/// Outcome of one level of the descent, returned up the stack.
enum Descent {
    /// Names leaf-first; each unwinding frame pushes its child's name.
    Found(Vec<String>),
    NotFound,
    Failed,
}

/// Mutable search state threaded through the recursion.
struct SearchState {
    query: String,
    most_probable_path: Vec<String>,
    is_first_try: bool,
    ret_times: usize,
    token_used: usize,
}

impl SearchState {
    fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            most_probable_path: Vec::new(),
            is_first_try: true,
            ret_times: 0,
            token_used: 0,
        }
    }
}

pub struct Retriever<'a, G, S> {
    generator: &'a G,
    sim: &'a S,
}

impl<'a, G, S> Retriever<'a, G, S>
where
    G: GenerationBackend,
    S: SimilarityBackend,
{
    pub fn new(generator: &'a G, sim: &'a S) -> Self {
        Self { generator, sim }
    }

    /// Retrieve the method described by `query`. Runs a second pass with an
    /// expanded query when the first pass exhausts the tree cleanly.
    pub async fn retrieve(&self, query: &str, repo: &RepoTree) -> RetrievalResult {
        let mut state = SearchState::new(query);
        let root = &repo.main_directory;

        let mut is_query_expanded = false;
        let mut outcome = self.retrieve_in_dir(&mut state, root).await;

        if matches!(outcome, Descent::NotFound) {
            is_query_expanded = true;
            let expansion = expander::expand(self.generator, self.sim, &state.query, root).await;
            match expansion {
                Ok((expanded, tokens)) => {
                    state.token_used += tokens;
                    state.query = expanded;
                    outcome = self.retrieve_in_dir(&mut state, root).await;
                }
                Err(e) => {
                    tracing::error!("Query expansion failed: {e:#}");
                    outcome = Descent::Failed;
                }
            }
        }

        let (found, error, path) = match outcome {
            Descent::Found(mut path) => {
                path.reverse();
                (true, false, path)
            }
            Descent::NotFound => (false, false, state.most_probable_path.clone()),
            Descent::Failed => (false, true, state.most_probable_path.clone()),
        };

        tracing::info!(
            found,
            error,
            is_query_expanded,
            ret_times = state.ret_times,
            token_used = state.token_used,
            "Retrieval complete"
        );

        RetrievalResult {
            found,
            error,
            is_query_expanded,
            path,
            ret_times: state.ret_times,
            token_used: state.token_used,
        }
    }

    /// One decision call. Failures are logged and reported as `None`; the
    /// caller turns them into `Descent::Failed`.
    async fn infer(
        &self,
        state: &mut SearchState,
        node_id: u32,
        system: &str,
        user: &str,
    ) -> Option<String> {
        state.ret_times += 1;
        match self
            .generator
            .generate(system, user, RET_MAX_OUTPUT_TOKENS)
            .await
        {
            Ok(generation) => {
                state.token_used += generation.total_tokens;
                Some(generation.text)
            }
            Err(e) => {
                tracing::error!(node_id, "Decision call failed: {e:#}");
                None
            }
        }
    }

    /// Rank usable children and render the decision prompt's information
    /// list. Returns `None` when there is nothing to rank or the prompt
    /// would blow the token budget; both are dead ends for this scope.
    async fn build_info_list(
        &self,
        state: &SearchState,
        node_id: u32,
        system: &str,
        candidates: Vec<Candidate>,
        cap: usize,
        with_signature: bool,
    ) -> Option<(String, Vec<RankedCandidate>)> {
        if candidates.is_empty() {
            tracing::warn!(node_id, "No usable summaries in this scope");
            return None;
        }

        let mut ranked = match rank::rank(self.sim, &state.query, candidates).await {
            Ok(ranked) => ranked,
            Err(e) => {
                tracing::error!(node_id, "Similarity ranking failed: {e:#}");
                return None;
            }
        };
        ranked.truncate(cap);

        let mut user = format!(
            "Method Description: {}\n{}\nInformation List:\n",
            state.query, INPUT_SEPARATOR
        );
        for candidate in &ranked {
            let record = if with_signature {
                json!({
                    "id": candidate.id,
                    "name": candidate.name,
                    "signature": candidate.signature,
                    "similarity": candidate.similarity,
                    "summary": candidate.summary,
                })
            } else {
                json!({
                    "id": candidate.id,
                    "name": candidate.name,
                    "similarity": candidate.similarity,
                    "summary": candidate.summary,
                })
            };
            let line = format!("{record}\n");
            if !fits(
                self.generator,
                system,
                &format!("{user}{line}"),
                RET_MAX_OUTPUT_TOKENS,
            ) {
                tracing::warn!(node_id, "Information list exceeds the token budget");
                return None;
            }
            user.push_str(&line);
        }

        Some((user, ranked))
    }

    /// Pick among a directory's subdirectories and files, backtracking
    /// through the model's top choices.
    fn retrieve_in_dir<'b>(
        &'b self,
        state: &'b mut SearchState,
        dir: &'b DirNode,
    ) -> BoxFuture<'b, Descent> {
        async move {
            if dir.subdirectories.is_empty() && dir.files.is_empty() {
                tracing::warn!(node_id = dir.id, "Empty directory");
                return Descent::Failed;
            }

            let mut candidates = Vec::new();
            for sub in &dir.subdirectories {
                if let Some(text) = sub.summary.usable() {
                    candidates.push(Candidate {
                        id: sub.id,
                        name: sub.name.clone(),
                        signature: None,
                        summary: text.to_string(),
                    });
                }
            }
            for file in &dir.files {
                if let Some(text) = file.summary.usable() {
                    candidates.push(Candidate {
                        id: file.id,
                        name: file.name.clone(),
                        signature: None,
                        summary: text.to_string(),
                    });
                }
            }

            let Some((user, _)) = self
                .build_info_list(
                    state,
                    dir.id,
                    RET_DIR_SYSTEM_PROMPT,
                    candidates,
                    DIR_MAX_CANDIDATES,
                    false,
                )
                .await
            else {
                return Descent::Failed;
            };

            let Some(output) = self.infer(state, dir.id, RET_DIR_SYSTEM_PROMPT, &user).await
            else {
                return Descent::Failed;
            };
            let choices = match decision::parse_ranked(&output) {
                Ok(choices) => choices,
                Err(e) => {
                    tracing::error!(node_id = dir.id, "Unparseable decision: {e:#}");
                    return Descent::Failed;
                }
            };

            for id in decision::dedup_ids(choices.ids)
                .into_iter()
                .take(MAX_BACKTRACK_COUNT)
            {
                let outcome = if let Some(file) = dir.find_file(id) {
                    if state.is_first_try {
                        state.most_probable_path.push(file.name.clone());
                    }
                    match self.retrieve_in_file(state, file).await {
                        Descent::Found(mut path) => {
                            path.push(file.name.clone());
                            Descent::Found(path)
                        }
                        other => other,
                    }
                } else if let Some(sub) = dir.find_subdirectory(id) {
                    if state.is_first_try {
                        state.most_probable_path.push(sub.name.clone());
                    }
                    match self.retrieve_in_dir(state, sub).await {
                        Descent::Found(mut path) => {
                            path.push(sub.name.clone());
                            Descent::Found(path)
                        }
                        other => other,
                    }
                } else {
                    tracing::error!(node_id = dir.id, id, "Decision named an unknown child");
                    return Descent::Failed;
                };

                match outcome {
                    Descent::NotFound => continue,
                    other => return other,
                }
            }

            Descent::NotFound
        }
        .boxed()
    }

    /// Pick among a file's classes, backtracking through the model's top
    /// choices.
    async fn retrieve_in_file(&self, state: &mut SearchState, file: &FileNode) -> Descent {
        if file.classes.is_empty() {
            tracing::warn!(node_id = file.id, "No class in this file");
            return Descent::Failed;
        }

        let candidates = file
            .classes
            .iter()
            .filter_map(|cls| {
                cls.summary.usable().map(|text| Candidate {
                    id: cls.id,
                    name: cls.name.clone(),
                    signature: None,
                    summary: text.to_string(),
                })
            })
            .collect();

        let Some((user, _)) = self
            .build_info_list(
                state,
                file.id,
                RET_FILE_SYSTEM_PROMPT,
                candidates,
                FILE_MAX_CANDIDATES,
                false,
            )
            .await
        else {
            return Descent::Failed;
        };

        let Some(output) = self
            .infer(state, file.id, RET_FILE_SYSTEM_PROMPT, &user)
            .await
        else {
            return Descent::Failed;
        };
        let choices = match decision::parse_ranked(&output) {
            Ok(choices) => choices,
            Err(e) => {
                tracing::error!(node_id = file.id, "Unparseable decision: {e:#}");
                return Descent::Failed;
            }
        };

        for id in decision::dedup_ids(choices.ids)
            .into_iter()
            .take(MAX_BACKTRACK_COUNT)
        {
            let Some(cls) = file.find_class(id) else {
                tracing::error!(node_id = file.id, id, "Decision named an unknown class");
                return Descent::Failed;
            };

            if state.is_first_try {
                state.most_probable_path.push(cls.name.clone());
            }

            match self.retrieve_in_class(state, cls).await {
                Descent::Found(mut path) => {
                    path.push(cls.name.clone());
                    return Descent::Found(path);
                }
                Descent::NotFound => continue,
                Descent::Failed => return Descent::Failed,
            }
        }

        Descent::NotFound
    }

    /// Terminal level: ask for the one method matching the query, or -1.
    async fn retrieve_in_class(&self, state: &mut SearchState, cls: &ClassNode) -> Descent {
        if cls.methods.is_empty() {
            tracing::warn!(node_id = cls.id, "No method in this class");
            return Descent::Failed;
        }

        let candidates = cls
            .methods
            .iter()
            .filter_map(|method| {
                method.summary.usable().map(|text| Candidate {
                    id: method.id,
                    name: method.name.clone(),
                    signature: Some(method.signature.clone()),
                    summary: text.to_string(),
                })
            })
            .collect();

        let Some((user, _)) = self
            .build_info_list(
                state,
                cls.id,
                RET_CLS_SYSTEM_PROMPT,
                candidates,
                CLS_MAX_CANDIDATES,
                true,
            )
            .await
        else {
            return Descent::Failed;
        };

        let Some(output) = self.infer(state, cls.id, RET_CLS_SYSTEM_PROMPT, &user).await else {
            return Descent::Failed;
        };
        let choice = match decision::parse_single(&output) {
            Ok(choice) => choice,
            Err(e) => {
                tracing::error!(node_id = cls.id, "Unparseable decision: {e:#}");
                return Descent::Failed;
            }
        };

        if choice.id == -1 {
            // the walk has left its most probable branch
            state.is_first_try = false;
            return Descent::NotFound;
        }

        let Some(method) = cls.find_method(choice.id) else {
            tracing::error!(node_id = cls.id, id = choice.id, "Decision named an unknown method");
            return Descent::Failed;
        };

        Descent::Found(vec![method.name.clone()])
    }
}
