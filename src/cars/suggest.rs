use axum::{
	extract::{Query, State},
	Json,
};
use mongodb::bson::Bson;

use crate::{db_client::DbClient, error::ApiResult};

const MAX_DISTANCE: usize = 2;
const SUGGESTED_FIELDS: [&str; 3] = ["make", "model", "location"];

#[derive(serde::Deserialize, Debug)]
pub struct SuggestParams {
	#[serde(default)]
	pub q: String,
}

#[derive(serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
	pub value: String,
	pub field: &'static str,
}

/// Values within a small edit distance of `keyword`, closest first.
pub fn close_matches(keyword: &str, field: &'static str, values: &[String]) -> Vec<(usize, Suggestion)> {
	let keyword = keyword.trim().to_lowercase();
	let mut matches: Vec<(usize, Suggestion)> = values
		.iter()
		.filter_map(|value| {
			let distance = levenshtein::levenshtein(&value.to_lowercase(), &keyword);
			(distance <= MAX_DISTANCE).then(|| (distance, Suggestion { value: value.clone(), field }))
		})
		.collect();
	matches.sort_by_cached_key(|(distance, s)| (*distance, s.value.to_lowercase(), s.value.clone()));
	matches.dedup_by(|a, b| a.1.value.eq_ignore_ascii_case(&b.1.value));
	matches
}

pub async fn suggest(db: State<DbClient>, Query(params): Query<SuggestParams>) -> ApiResult<Json<Vec<Suggestion>>> {
	if params.q.trim().is_empty() {
		return Ok(Json(Vec::new()));
	}

	let mut found = Vec::new();
	for field in SUGGESTED_FIELDS {
		let values: Vec<String> = db
			.listings()
			.distinct(field, None, None)
			.await?
			.into_iter()
			.filter_map(|value| match value {
				Bson::String(s) if !s.trim().is_empty() => Some(s),
				_ => None,
			})
			.collect();
		found.extend(close_matches(&params.q, field, &values));
	}
	found.sort_by_key(|(distance, _)| *distance);
	Ok(Json(found.into_iter().map(|(_, suggestion)| suggestion).collect()))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn values(v: &[&str]) -> Vec<String> {
		v.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn typos_are_matched() {
		let makes = values(&["Toyota", "Hyundai", "Mercedes", "BMW"]);
		let found = close_matches("toyta", "make", &makes);
		assert_eq!(found.len(), 1);
		assert_eq!(found[0].1, Suggestion { value: "Toyota".to_owned(), field: "make" });
	}

	#[test]
	fn closest_first_without_duplicates() {
		let models = values(&["Corolla", "corolla", "Carolla", "Camry"]);
		let found = close_matches("Corolla", "model", &models);
		let names: Vec<_> = found.iter().map(|(_, s)| s.value.as_str()).collect();
		assert_eq!(names, vec!["Corolla", "Carolla"]);
		assert_eq!(found[0].0, 0);
	}

	#[test]
	fn case_variants_collapse_even_when_not_adjacent_in_byte_order() {
		let models = values(&["corolla", "Corolly", "COROLLA"]);
		let found = close_matches("corollx", "model", &models);
		let names: Vec<_> = found.iter().map(|(_, s)| s.value.as_str()).collect();
		assert_eq!(names, vec!["COROLLA", "Corolly"]);
	}

	#[test]
	fn distant_values_are_ignored() {
		assert!(close_matches("kia", "make", &values(&["Mercedes"])).is_empty());
	}
}
