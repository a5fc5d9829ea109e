//! System prompt for a live session, built from the caller's retrieval context.

use crate::models::{PendingRequest, RagResult};
use std::fmt::Write;

const BASE_INSTRUCTION: &str = "You are a friendly voice guide for a map of local small businesses (UMKM). \
Answer in the same language the user speaks, keep spoken answers short, and only recommend \
businesses from the list below. When you mention a specific business, call show_umkm_details \
with its umkm_id. Use highlight_umkm when comparing several businesses and navigate_to_umkm \
when the user asks for directions. Never invent umkm_id values.";

fn describe(result: &RagResult, rank: usize, out: &mut String) {
    let _ = write!(
        out,
        "{}. [{}] {} (lat {:.5}, lon {:.5})",
        rank, result.umkm_id, result.name, result.lat, result.lon
    );
    if let Some(category) = &result.category {
        let _ = write!(out, ", category: {}", category);
    }
    if let Some(address) = &result.address {
        let _ = write!(out, ", address: {}", address);
    }
    if let Some(similarity) = result.similarity {
        let _ = write!(out, ", relevance: {:.2}", similarity);
    }
    out.push('\n');
}

pub fn build_system_prompt(request: &PendingRequest, max_results: usize) -> String {
    let mut prompt = String::from(BASE_INSTRUCTION);
    prompt.push_str("\n\n");

    if request.rag_results.is_empty() {
        prompt.push_str(
            "No businesses matched the user's query. Say so briefly and suggest a different search.\n",
        );
    } else {
        prompt.push_str("Businesses relevant to the user's query, most relevant first:\n");
        for (index, result) in request.rag_results.iter().take(max_results).enumerate() {
            describe(result, index + 1, &mut prompt);
        }
    }

    if let Some(location) = request.user_location {
        let _ = write!(
            prompt,
            "\nThe user is currently at lat {:.5}, lon {:.5}. Prefer nearby businesses when distance matters.\n",
            location.lat, location.lon
        );
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateSessionRequest, UserLocation};

    fn result(id: &str, name: &str) -> RagResult {
        RagResult {
            umkm_id: id.into(),
            name: name.into(),
            lat: -6.9,
            lon: 107.6,
            similarity: Some(0.91),
            category: Some("kuliner".into()),
            address: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn test_prompt_lists_results_and_location() {
        let request = PendingRequest::from_body(
            "s1",
            CreateSessionRequest {
                query: "cari kopi".into(),
                rag_results: Some(vec![result("u1", "Kopi Senja"), result("u2", "Kopi Pagi")]),
                user_location: Some(UserLocation { lat: -6.91, lon: 107.61 }),
                ..Default::default()
            },
        );

        let prompt = build_system_prompt(&request, 1);
        assert!(prompt.contains("1. [u1] Kopi Senja"));
        assert!(!prompt.contains("Kopi Pagi"));
        assert!(prompt.contains("category: kuliner"));
        assert!(prompt.contains("lat -6.91000, lon 107.61000"));
    }

    #[test]
    fn test_prompt_without_results() {
        let request = PendingRequest::from_body("s1", CreateSessionRequest::default());
        let prompt = build_system_prompt(&request, 10);
        assert!(prompt.contains("No businesses matched"));
    }
}
