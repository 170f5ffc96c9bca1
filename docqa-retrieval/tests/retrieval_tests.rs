//! Property tests for similarity ranking and embedding degradation.

use std::collections::HashSet;
use std::sync::Arc;

use docqa_retrieval::{
    EmbedderKind, Embedder, Embedding, IndexKind, ModelHandle, RetrievalConfig, SimilarityIndex,
    TokenFrequencyEmbedder, build_index, retrieve_top_k,
};
use proptest::prelude::*;

/// Generate a dense vector of the given dimension, zero vectors included.
fn arb_vector(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim)
}

/// Generate a short chunk of lowercase words.
fn arb_chunk() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-e]{1,3}", 1..8).prop_map(|w| w.join(" "))
}

/// **Property 4: Top-k bounds**
/// *For any* index and query, search SHALL return exactly `min(k, len)`
/// distinct positions, all within the index, ordered by descending score.
mod prop_top_k_bounds {
    use super::*;

    const DIM: usize = 8;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn dense_search_returns_min_k_len_distinct_ranked_positions(
            vectors in proptest::collection::vec(arb_vector(DIM), 0..20),
            query in arb_vector(DIM),
            k in 0usize..25,
            exact in any::<bool>(),
        ) {
            let kind = if exact { IndexKind::ExactL2 } else { IndexKind::Brute };
            let len = vectors.len();
            let index =
                SimilarityIndex::build(vectors.into_iter().map(Embedding::Dense).collect(), kind)
                    .unwrap();
            let outcome = index.search(&Embedding::Dense(query), k);

            prop_assert!(!outcome.degraded);
            prop_assert_eq!(outcome.hits.len(), k.min(len));
            let positions: HashSet<usize> = outcome.hits.iter().map(|h| h.position).collect();
            prop_assert_eq!(positions.len(), outcome.hits.len());
            prop_assert!(positions.iter().all(|&p| p < len));
            for pair in outcome.hits.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
            }
        }

        #[test]
        fn retrieve_top_k_returns_members_of_chunks(
            chunks in proptest::collection::vec(arb_chunk(), 1..15),
            question in arb_chunk(),
            k in 0usize..20,
        ) {
            let embedder = TokenFrequencyEmbedder;
            let embeddings =
                chunks.iter().map(|c| Embedding::Sparse(embedder.embed(c))).collect();
            let index = build_index(embeddings, IndexKind::Brute).unwrap();
            let query = Embedding::Sparse(embedder.embed(&question));

            let top = retrieve_top_k(&index, &query, &chunks, k);
            prop_assert_eq!(top.len(), k.min(chunks.len()));
            prop_assert!(top.iter().all(|c| chunks.contains(c)));
        }
    }
}

/// **Property 5: Stable ties**
/// *For any* index whose chunks all score equally, search SHALL return the
/// leading positions in document order.
mod prop_stable_ties {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn equal_scores_keep_document_order(
            vector in arb_vector(4),
            len in 1usize..20,
            k in 1usize..20,
        ) {
            let embeddings = vec![Embedding::Dense(vector.clone()); len];
            let index = build_index(embeddings, IndexKind::Brute).unwrap();
            let positions = index.search(&Embedding::Dense(vector), k).positions();
            prop_assert_eq!(positions, (0..k.min(len)).collect::<Vec<_>>());
        }

        #[test]
        fn incompatible_query_returns_leading_chunks(
            len in 1usize..20,
            k in 1usize..20,
        ) {
            let embedder = TokenFrequencyEmbedder;
            let embeddings = vec![Embedding::Sparse(embedder.embed("alpha beta")); len];
            let index = build_index(embeddings, IndexKind::Brute).unwrap();
            let outcome = index.search(&Embedding::Dense(vec![1.0, 0.0]), k);
            prop_assert!(outcome.degraded);
            prop_assert_eq!(outcome.positions(), (0..k.min(len)).collect::<Vec<_>>());
        }
    }
}

/// **Property 6: Degraded embedding keeps one embedding per chunk**
/// *For any* chunk list, a dense embedder with no model SHALL still return
/// one embedding per chunk and report the degradation.
mod prop_degraded_embedding {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn unavailable_model_embeds_every_chunk(
            chunks in proptest::collection::vec(arb_chunk(), 0..20),
        ) {
            let config = RetrievalConfig::builder().embedder(EmbedderKind::Dense).build().unwrap();
            let embedder = Embedder::from_config(&config, Arc::new(ModelHandle::unavailable()));
            let embedded = embedder.embed_chunks(&chunks);

            prop_assert_eq!(embedded.embeddings.len(), chunks.len());
            prop_assert!(embedded.report.degraded());
            prop_assert_eq!(embedded.report.effective, EmbedderKind::TokenFrequency);
        }
    }
}
