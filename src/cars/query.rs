//! Listing search: turns optional filter, sort and paging parameters into a
//! MongoDB query, runs it, and returns one page plus pagination metadata.

use std::collections::{HashMap, HashSet};

use futures::TryStreamExt;
use mongodb::{
	bson::{doc, oid::ObjectId, Bson, Document, Regex},
	options::FindOptions,
};

use super::listing::{Listing, ListingView};
use crate::{
	db_client::{DbClient, USERS},
	error::{ApiError, ApiResult},
};

pub const DEFAULT_LIMIT: u64 = 12;
pub const MAX_LIMIT: u64 = 100;
pub const UNKNOWN_SELLER: &str = "Unknown Seller";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
	#[default]
	Newest,
	Oldest,
	PriceAsc,
	PriceDesc,
}

impl SortKey {
	/// Accepts `priceAsc`, `price_asc`, `price-asc` and friends.
	pub fn parse(value: &str) -> ApiResult<Self> {
		let key: String = value.chars().filter(|c| *c != '_' && *c != '-').collect::<String>().to_ascii_lowercase();
		match key.as_str() {
			"" | "newest" => Ok(SortKey::Newest),
			"oldest" => Ok(SortKey::Oldest),
			"priceasc" | "pricelowtohigh" => Ok(SortKey::PriceAsc),
			"pricedesc" | "pricehightolow" => Ok(SortKey::PriceDesc),
			_ => Err(ApiError::bad_request(format!("Invalid sortBy value: {value}"))),
		}
	}

	/// `_id` breaks ties so a page boundary never splits equal keys
	/// differently between two requests.
	pub fn sort_document(&self) -> Document {
		match self {
			SortKey::Newest => doc! { "created_at": -1, "_id": -1 },
			SortKey::Oldest => doc! { "created_at": 1, "_id": 1 },
			SortKey::PriceAsc => doc! { "price": 1, "_id": 1 },
			SortKey::PriceDesc => doc! { "price": -1, "_id": -1 },
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
	pub page: u64,
	pub limit: u64,
}

impl Default for PageWindow {
	fn default() -> Self {
		PageWindow { page: 1, limit: DEFAULT_LIMIT }
	}
}

impl PageWindow {
	pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
		let page = page.unwrap_or(1).max(1) as u64;
		let limit = limit.map_or(DEFAULT_LIMIT, |l| l.clamp(1, MAX_LIMIT as i64) as u64);
		PageWindow { page, limit }
	}

	/// Capped at `i64::MAX`, the largest skip the server accepts.
	pub fn skip(&self) -> u64 {
		(self.page - 1).saturating_mul(self.limit).min(i64::MAX as u64)
	}

	pub fn paginate(&self, total_count: u64) -> Pagination {
		let total_pages = total_count.div_ceil(self.limit).max(1);
		Pagination {
			current_page: self.page,
			total_pages,
			total_count,
			has_next: self.page < total_pages,
			has_previous: self.page > 1,
		}
	}
}

#[derive(serde::Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
	pub current_page: u64,
	pub total_pages: u64,
	pub total_count: u64,
	pub has_next: bool,
	pub has_previous: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingFilter {
	pub make: Option<String>,
	pub model: Option<String>,
	pub min_year: Option<i64>,
	pub max_year: Option<i64>,
	pub body_type: Option<String>,
	pub min_price: Option<f64>,
	pub max_price: Option<f64>,
	pub location: Option<String>,
	pub fuel_type: Option<String>,
	pub transmission_type: Option<String>,
	pub colors: Vec<String>,
	pub condition: Option<String>,
	pub search: Option<String>,
	pub exclude_owner: Option<String>,
}

fn exact(value: &str) -> Regex {
	Regex { pattern: format!("^{}$", regex::escape(value)), options: "i".to_owned() }
}

fn contains(value: &str) -> Regex {
	Regex { pattern: regex::escape(value), options: "i".to_owned() }
}

fn range<T: Into<Bson> + Copy>(min: Option<T>, max: Option<T>) -> Option<Document> {
	let mut bounds = Document::new();
	if let Some(min) = min {
		bounds.insert("$gte", min);
	}
	if let Some(max) = max {
		bounds.insert("$lte", max);
	}
	(!bounds.is_empty()).then_some(bounds)
}

impl ListingFilter {
	pub fn to_document(&self) -> Document {
		let mut filter = Document::new();
		let exact_fields = [
			("make", &self.make),
			("model", &self.model),
			("bodyType", &self.body_type),
			("fuelType", &self.fuel_type),
			("transmissionType", &self.transmission_type),
			("condition", &self.condition),
		];
		for (key, value) in exact_fields {
			if let Some(value) = value {
				filter.insert(key, exact(value));
			}
		}
		if let Some(years) = range(self.min_year, self.max_year) {
			filter.insert("year", years);
		}
		if let Some(prices) = range(self.min_price, self.max_price) {
			filter.insert("price", prices);
		}
		if let Some(location) = &self.location {
			filter.insert("location", contains(location));
		}
		if !self.colors.is_empty() {
			let colors: Vec<Bson> = self.colors.iter().map(|c| Bson::RegularExpression(exact(c))).collect();
			filter.insert("color", doc! { "$in": colors });
		}
		if let Some(search) = &self.search {
			let term = contains(search);
			filter.insert(
				"$or",
				vec![
					doc! { "title": term.clone() },
					doc! { "make": term.clone() },
					doc! { "model": term.clone() },
					doc! { "description": term },
				],
			);
		}
		if let Some(owner) = &self.exclude_owner {
			let mut excluded = vec![Bson::String(owner.clone())];
			if let Ok(oid) = ObjectId::parse_str(owner) {
				excluded.push(Bson::ObjectId(oid));
			}
			filter.insert("owner_id", doc! { "$nin": excluded });
		}
		filter
	}
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingQuery {
	pub filter: ListingFilter,
	pub sort: SortKey,
	pub window: PageWindow,
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> ApiResult<T> {
	value.parse().map_err(|_| ApiError::bad_request(format!("Invalid value for {key}: {value}")))
}

/// The last non-empty value given for `key`, parsed as a number.
pub(crate) fn number_param<T: std::str::FromStr>(pairs: &[(String, String)], key: &str) -> ApiResult<Option<T>> {
	pairs
		.iter()
		.rev()
		.find(|(k, v)| k == key && !v.trim().is_empty())
		.map(|(_, v)| parse_num(key, v.trim()))
		.transpose()
}

impl ListingQuery {
	/// Builds a query from raw query-string pairs. Keys may repeat (`color`)
	/// and both camelCase and snake_case spellings are accepted. Empty values
	/// are ignored.
	pub fn from_pairs(pairs: &[(String, String)]) -> ApiResult<Self> {
		let mut query = ListingQuery::default();
		let (mut page, mut limit) = (None, None);
		let filter = &mut query.filter;

		for (key, value) in pairs {
			let value = value.trim();
			if value.is_empty() {
				continue;
			}
			let text = Some(value.to_owned());
			match key.as_str() {
				"make" => filter.make = text,
				"model" => filter.model = text,
				"minYear" | "min_year" => filter.min_year = Some(parse_num(key, value)?),
				"maxYear" | "max_year" => filter.max_year = Some(parse_num(key, value)?),
				"bodyType" | "body_type" => filter.body_type = text,
				"minPrice" | "min_price" => filter.min_price = Some(parse_num(key, value)?),
				"maxPrice" | "max_price" => filter.max_price = Some(parse_num(key, value)?),
				"location" => filter.location = text,
				"fuelType" | "fuel_type" => filter.fuel_type = text,
				"transmissionType" | "transmission_type" => filter.transmission_type = text,
				"color" | "color[]" | "colors" => filter.colors.extend(
					value.split(',').map(str::trim).filter(|c| !c.is_empty()).map(str::to_owned),
				),
				"condition" => filter.condition = text,
				"search" | "q" => filter.search = text,
				"exclude_user_id" | "excludeUserId" => filter.exclude_owner = text,
				"sortBy" | "sort_by" | "sort" => query.sort = SortKey::parse(value)?,
				"page" => page = Some(parse_num(key, value)?),
				"limit" => limit = Some(parse_num(key, value)?),
				_ => log::debug!("ignoring unknown listing parameter {key}"),
			}
		}
		query.window = PageWindow::new(page, limit);
		Ok(query)
	}
}

#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct ListingPage {
	pub listings: Vec<ListingView>,
	pub pagination: Pagination,
}

/// Runs the query: count on the filtered set, then one sorted, windowed
/// fetch, then a single owner-name lookup for the page.
pub async fn search_listings(db: &DbClient, query: &ListingQuery) -> ApiResult<ListingPage> {
	let filter = query.filter.to_document();
	let total_count = db.listings().count_documents(filter.clone(), None).await?;
	let pagination = query.window.paginate(total_count);
	if query.window.skip() >= total_count {
		return Ok(ListingPage { listings: Vec::new(), pagination });
	}

	let options = FindOptions::builder()
		.sort(query.sort.sort_document())
		.skip(query.window.skip())
		.limit(query.window.limit as i64)
		.build();
	let listings: Vec<Listing> = db.listings().find(filter, options).await?.try_collect().await?;
	log::debug!("listing search matched {} (page {} of {})", total_count, pagination.current_page, pagination.total_pages);

	let names = owner_names(db, &listings).await?;
	Ok(ListingPage { listings: with_owner_names(listings, &names), pagination })
}

/// Resolves the distinct owners of `listings` to usernames in one query.
pub async fn owner_names(db: &DbClient, listings: &[Listing]) -> ApiResult<HashMap<String, String>> {
	let ids: HashSet<ObjectId> = listings.iter().filter_map(|l| ObjectId::parse_str(l.owner_key()).ok()).collect();
	if ids.is_empty() {
		return Ok(HashMap::new());
	}
	let ids: Vec<ObjectId> = ids.into_iter().collect();
	let options = FindOptions::builder().projection(doc! { "username": 1 }).build();
	let mut cursor = db.collection::<Document>(USERS).find(doc! { "_id": { "$in": ids } }, options).await?;

	let mut names = HashMap::new();
	while let Some(user) = cursor.try_next().await? {
		if let (Ok(id), Ok(name)) = (user.get_object_id("_id"), user.get_str("username")) {
			names.insert(id.to_hex(), name.to_owned());
		}
	}
	Ok(names)
}

pub fn with_owner_names(listings: Vec<Listing>, names: &HashMap<String, String>) -> Vec<ListingView> {
	listings
		.into_iter()
		.map(|listing| {
			let name = names.get(&listing.owner_key()).cloned().unwrap_or_else(|| UNKNOWN_SELLER.to_owned());
			ListingView::new(listing, name)
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cars::listing::ListingStatus;
	use mongodb::bson::DateTime;

	fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
		raw.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
	}

	fn listing(price: f64, owner: Bson) -> Listing {
		Listing {
			id: Some(ObjectId::new()),
			title: "Car".to_owned(),
			make: "Kia".to_owned(),
			model: "Rio".to_owned(),
			year: 2019,
			body_type: String::new(),
			price,
			kilometers: 0,
			fuel_type: String::new(),
			transmission_type: String::new(),
			color: String::new(),
			condition: String::new(),
			cc: None,
			location: String::new(),
			description: String::new(),
			chat_option: String::new(),
			images: vec![],
			owner_id: owner,
			status: ListingStatus::Active,
			views: 0,
			created_at: DateTime::now(),
			updated_at: None,
		}
	}

	#[test]
	fn five_results_two_per_page() {
		let pagination = PageWindow::new(Some(1), Some(2)).paginate(5);
		assert_eq!(pagination.total_pages, 3);
		assert!(pagination.has_next);
		assert!(!pagination.has_previous);
	}

	#[test]
	fn zero_results_still_one_page() {
		let pagination = PageWindow::default().paginate(0);
		assert_eq!(pagination.total_pages, 1);
		assert_eq!(pagination.total_count, 0);
		assert!(!pagination.has_next);
		assert!(!pagination.has_previous);
	}

	#[test]
	fn window_flags_agree_with_total_pages() {
		for limit in [1_i64, 2, 7, 12, 100] {
			for page in 1_i64..=6 {
				for total in [0_u64, 1, 5, 12, 13, 250] {
					let window = PageWindow::new(Some(page), Some(limit));
					let p = window.paginate(total);
					assert_eq!(window.skip(), (page as u64 - 1) * limit as u64);
					assert_eq!(p.has_next, p.current_page < p.total_pages);
					assert_eq!(p.has_previous, p.current_page > 1);
					assert!(p.total_pages >= 1);
					assert!(p.total_pages * window.limit >= total);
				}
			}
		}
	}

	#[test]
	fn window_clamps_page_and_limit() {
		assert_eq!(PageWindow::new(Some(0), Some(500)), PageWindow { page: 1, limit: MAX_LIMIT });
		assert_eq!(PageWindow::new(Some(-3), Some(0)), PageWindow { page: 1, limit: 1 });
		assert_eq!(PageWindow::new(None, None), PageWindow { page: 1, limit: DEFAULT_LIMIT });
	}

	#[test]
	fn huge_page_is_past_the_end() {
		let query = ListingQuery::from_pairs(&pairs(&[("page", "9223372036854775807"), ("limit", "12")])).unwrap();
		let window = query.window;
		assert_eq!(window.skip(), i64::MAX as u64);
		assert!(i64::try_from(window.skip()).is_ok());
		let options = FindOptions::builder().skip(window.skip()).limit(window.limit as i64).build();
		assert_eq!(options.skip, Some(i64::MAX as u64));

		let p = window.paginate(5);
		assert_eq!(p.current_page, i64::MAX as u64);
		assert_eq!(p.total_pages, 1);
		assert!(!p.has_next);
		assert!(p.has_previous);
	}

	#[test]
	fn sort_keys_map_to_documents() {
		assert_eq!(SortKey::default().sort_document(), doc! { "created_at": -1, "_id": -1 });
		assert_eq!(SortKey::parse("priceAsc").unwrap().sort_document(), doc! { "price": 1, "_id": 1 });
		assert_eq!(SortKey::parse("price_desc").unwrap(), SortKey::PriceDesc);
		assert_eq!(SortKey::parse("oldest").unwrap(), SortKey::Oldest);
		assert!(SortKey::parse("cheapest").is_err());
	}

	#[test]
	fn exclusion_covers_string_and_object_id() {
		let owner = ObjectId::new();
		let filter = ListingFilter { exclude_owner: Some(owner.to_hex()), ..Default::default() }.to_document();
		let excluded = filter.get_document("owner_id").unwrap().get_array("$nin").unwrap();
		assert!(excluded.contains(&Bson::String(owner.to_hex())));
		assert!(excluded.contains(&Bson::ObjectId(owner)));
	}

	#[test]
	fn exclusion_of_non_object_id_keeps_string_only() {
		let filter = ListingFilter { exclude_owner: Some("legacy-user".to_owned()), ..Default::default() }.to_document();
		let excluded = filter.get_document("owner_id").unwrap().get_array("$nin").unwrap();
		assert_eq!(excluded, &vec![Bson::String("legacy-user".to_owned())]);
	}

	#[test]
	fn search_is_escaped_case_insensitive_or() {
		let filter = ListingFilter { search: Some("c++ (v6)".to_owned()), ..Default::default() }.to_document();
		let clauses = filter.get_array("$or").unwrap();
		assert_eq!(clauses.len(), 4);
		let Bson::Document(title) = &clauses[0] else { panic!("expected document") };
		let Bson::RegularExpression(re) = title.get("title").unwrap() else { panic!("expected regex") };
		assert_eq!(re.pattern, r"c\+\+ \(v6\)");
		assert_eq!(re.options, "i");
	}

	#[test]
	fn ranges_and_exact_fields() {
		let query = ListingQuery::from_pairs(&pairs(&[
			("make", "Toyota"),
			("minYear", "2015"),
			("maxYear", "2020"),
			("minPrice", "100000"),
			("bodyType", "SUV"),
			("color", "Red"),
			("color", "black, white"),
			("location", ""),
		]))
		.unwrap();
		let filter = query.filter.to_document();
		assert_eq!(filter.get_document("year").unwrap(), &doc! { "$gte": 2015_i64, "$lte": 2020_i64 });
		assert_eq!(filter.get_document("price").unwrap(), &doc! { "$gte": 100000.0 });
		let Some(Bson::RegularExpression(make)) = filter.get("make") else { panic!("expected regex") };
		assert_eq!(make.pattern, "^Toyota$");
		assert!(filter.contains_key("bodyType"));
		assert!(!filter.contains_key("location"));
		assert_eq!(filter.get_document("color").unwrap().get_array("$in").unwrap().len(), 3);
	}

	#[test]
	fn empty_query_matches_everything() {
		let query = ListingQuery::from_pairs(&[]).unwrap();
		assert!(query.filter.to_document().is_empty());
		assert_eq!(query.sort, SortKey::Newest);
		assert_eq!(query.window, PageWindow::default());
	}

	#[test]
	fn malformed_numbers_are_rejected() {
		let err = ListingQuery::from_pairs(&pairs(&[("minPrice", "cheap")])).unwrap_err();
		assert_eq!(err.to_string(), "Invalid value for minPrice: cheap");
		assert!(ListingQuery::from_pairs(&pairs(&[("page", "two")])).is_err());
	}

	#[test]
	fn number_params_take_the_last_value() {
		let raw = pairs(&[("limit", "5"), ("limit", "7"), ("skip", ""), ("before", "x")]);
		assert_eq!(number_param::<i64>(&raw, "limit").unwrap(), Some(7));
		assert_eq!(number_param::<i64>(&raw, "skip").unwrap(), None);
		let err = number_param::<i64>(&pairs(&[("limit", "abc")]), "limit").unwrap_err();
		assert_eq!(err.to_string(), "Invalid value for limit: abc");
	}

	#[test]
	fn paging_parameters_are_read() {
		let query = ListingQuery::from_pairs(&pairs(&[("page", "3"), ("limit", "24"), ("sortBy", "priceDesc")])).unwrap();
		assert_eq!(query.window, PageWindow { page: 3, limit: 24 });
		assert_eq!(query.window.skip(), 48);
		assert_eq!(query.sort, SortKey::PriceDesc);
	}

	#[test]
	fn owner_names_fall_back_to_placeholder() {
		let known = ObjectId::new();
		let names = HashMap::from([(known.to_hex(), "mostafa".to_owned())]);
		let views = with_owner_names(
			vec![listing(1.0, Bson::ObjectId(known)), listing(2.0, Bson::String(known.to_hex())), listing(3.0, Bson::String("ghost".to_owned()))],
			&names,
		);
		assert_eq!(views[0].owner_name, "mostafa");
		assert_eq!(views[1].owner_name, "mostafa");
		assert_eq!(views[2].owner_name, UNKNOWN_SELLER);
	}
}
