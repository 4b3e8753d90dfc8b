//! Candidate ranking: score a node's children against the query and order
//! them by descending similarity before they are offered to the decision
//! step.

use anyhow::Result;

use crate::backend::SimilarityBackend;

/// A child node offered for ranking. Only nodes with a usable summary are
/// turned into candidates; `signature` is set for methods so the score can
/// see the declaration text too.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: u32,
    pub name: String,
    pub signature: Option<String>,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub id: u32,
    pub name: String,
    pub signature: Option<String>,
    pub summary: String,
    pub similarity: f32,
}

/// Round to 3 decimals so near-equal scores compare equal and the stable
/// sort keeps enumeration order between them.
fn round3(value: f32) -> f32 {
    (value * 1000.0).round() / 1000.0
}

/// Score `candidates` against `query` and sort by descending similarity.
/// Ties keep the original enumeration order.
pub async fn rank<S: SimilarityBackend>(
    sim: &S,
    query: &str,
    candidates: Vec<Candidate>,
) -> Result<Vec<RankedCandidate>> {
    if candidates.is_empty() {
        return Ok(vec![]);
    }

    let texts: Vec<String> = candidates
        .iter()
        .map(|c| match &c.signature {
            Some(sig) => format!("{} {}", sig, c.summary),
            None => c.summary.clone(),
        })
        .collect();

    let scores = sim.similarities(query, &texts).await?;

    let mut ranked: Vec<RankedCandidate> = candidates
        .into_iter()
        .zip(scores)
        .map(|(c, score)| RankedCandidate {
            id: c.id,
            name: c.name,
            signature: c.signature,
            summary: c.summary,
            similarity: round3(score),
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scores each candidate by the fraction of query words it contains.
    struct WordOverlapSim;

    impl SimilarityBackend for WordOverlapSim {
        async fn similarities(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
            let words: Vec<&str> = query.split_whitespace().collect();
            Ok(candidates
                .iter()
                .map(|c| {
                    let hits = words.iter().filter(|w| c.contains(*w)).count();
                    hits as f32 / words.len().max(1) as f32
                })
                .collect())
        }
    }

    fn candidate(id: u32, name: &str, summary: &str) -> Candidate {
        Candidate {
            id,
            name: name.to_string(),
            signature: None,
            summary: summary.to_string(),
        }
    }

    #[tokio::test]
    async fn test_rank_descending() {
        let candidates = vec![
            candidate(1, "util", "string helpers"),
            candidate(2, "queue", "message queue read and write"),
            candidate(3, "net", "socket message handling"),
        ];

        let ranked = rank(&WordOverlapSim, "read message from queue", candidates)
            .await
            .unwrap();

        assert_eq!(ranked[0].id, 2);
        assert!(ranked[0].similarity >= ranked[1].similarity);
        assert!(ranked[1].similarity >= ranked[2].similarity);
    }

    #[tokio::test]
    async fn test_rank_ties_keep_enumeration_order() {
        let candidates = vec![
            candidate(1, "a", "nothing relevant"),
            candidate(2, "b", "also nothing"),
            candidate(3, "c", "still nothing"),
        ];

        let ranked = rank(&WordOverlapSim, "zzz", candidates).await.unwrap();
        let ids: Vec<u32> = ranked.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_rank_uses_method_signature() {
        let with_sig = Candidate {
            id: 1,
            name: "pop".to_string(),
            signature: Some("int pop()".to_string()),
            summary: "removes the front element".to_string(),
        };
        let without = candidate(2, "push", "adds an element");

        let ranked = rank(&WordOverlapSim, "pop", vec![without, with_sig])
            .await
            .unwrap();
        assert_eq!(ranked[0].id, 1);
    }

    #[tokio::test]
    async fn test_rank_empty() {
        let ranked = rank(&WordOverlapSim, "anything", vec![]).await.unwrap();
        assert!(ranked.is_empty());
    }
}
