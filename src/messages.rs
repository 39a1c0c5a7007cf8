use std::collections::HashMap;

use axum::{
	extract::{Path, Query, State},
	Json,
};
use chrono::NaiveDateTime;
use futures::TryStreamExt;
use mongodb::{
	bson::{doc, oid::ObjectId, DateTime},
	options::FindOptions,
};
use serde_json::{json, Value};

use crate::{
	cars::query::number_param,
	db_client::{parse_object_id, rfc3339, DbClient},
	error::{ApiError, ApiResult},
	users::{find_user, AuthUser},
};

pub const DEFAULT_THREAD_LIMIT: i64 = 50;
pub const MAX_THREAD_LIMIT: i64 = 100;

/// A direct message between two users, optionally about a listing.
///
/// Participant ids are stored as hex strings and display names are copied
/// in at send time.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct Message {
	#[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
	pub id: Option<ObjectId>,
	pub sender_id: String,
	pub sender_name: String,
	pub recipient_id: String,
	pub recipient_name: String,
	pub content: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub listing_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub listing_title: Option<String>,
	#[serde(default)]
	pub is_read: bool,
	pub created_at: DateTime,
}

#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct MessageView {
	pub id: String,
	pub sender_id: String,
	pub sender_name: String,
	pub recipient_id: String,
	pub recipient_name: String,
	pub content: String,
	pub listing_id: Option<String>,
	pub listing_title: Option<String>,
	pub is_read: bool,
	pub created_at: String,
}

impl From<Message> for MessageView {
	fn from(m: Message) -> Self {
		MessageView {
			id: m.id.map(|id| id.to_hex()).unwrap_or_default(),
			sender_id: m.sender_id,
			sender_name: m.sender_name,
			recipient_id: m.recipient_id,
			recipient_name: m.recipient_name,
			content: m.content,
			listing_id: m.listing_id,
			listing_title: m.listing_title,
			is_read: m.is_read,
			created_at: rfc3339(m.created_at),
		}
	}
}

#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct Conversation {
	pub partner_id: String,
	pub partner_name: String,
	pub last_message: MessageView,
	pub unread_count: u64,
}

/// Folds `messages` (newest first) into one conversation per partner.
/// The first message seen for a partner is the conversation's latest, so
/// the output keeps newest-conversation-first order.
pub fn group_conversations(user_id: &str, messages: Vec<Message>) -> Vec<Conversation> {
	let mut positions: HashMap<String, usize> = HashMap::new();
	let mut conversations: Vec<Conversation> = Vec::new();

	for message in messages {
		let sent_by_me = message.sender_id == user_id;
		let (partner_id, partner_name) = if sent_by_me {
			(message.recipient_id.clone(), message.recipient_name.clone())
		} else {
			(message.sender_id.clone(), message.sender_name.clone())
		};
		let unread = u64::from(!sent_by_me && !message.is_read);

		match positions.get(&partner_id) {
			Some(&i) => conversations[i].unread_count += unread,
			None => {
				positions.insert(partner_id.clone(), conversations.len());
				conversations.push(Conversation { partner_id, partner_name, last_message: message.into(), unread_count: unread });
			}
		}
	}
	conversations
}

/// Accepts RFC 3339 or a naive ISO timestamp, the latter read as UTC.
pub fn parse_before(value: &str) -> ApiResult<DateTime> {
	let millis = chrono::DateTime::parse_from_rfc3339(value)
		.map(|dt| dt.timestamp_millis())
		.or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.and_utc().timestamp_millis()))
		.map_err(|_| ApiError::bad_request("Invalid date format for 'before' parameter"))?;
	Ok(DateTime::from_millis(millis))
}

fn between(a: &str, b: &str) -> mongodb::bson::Document {
	doc! { "$or": [
		{ "sender_id": a, "recipient_id": b },
		{ "sender_id": b, "recipient_id": a },
	] }
}

#[derive(serde::Deserialize, Debug)]
pub struct SendMessage {
	pub recipient_id: String,
	pub content: String,
	#[serde(default)]
	pub listing_id: Option<String>,
}

pub async fn send_message(db: State<DbClient>, caller: AuthUser, body: Json<SendMessage>) -> ApiResult<Json<Value>> {
	let body = body.0;
	if body.content.trim().is_empty() {
		return Err(ApiError::bad_request("Message content must not be empty"));
	}
	let (recipient_id, recipient) = find_user(&db, &body.recipient_id, "recipient").await?;
	if recipient_id == caller.id {
		return Err(ApiError::bad_request("Cannot send a message to yourself"));
	}

	let listing_title = match body.listing_id.as_deref().filter(|id| !id.trim().is_empty()) {
		Some(id) => {
			let oid = parse_object_id(id, "listing")?;
			let listing = db.listings().find_one(doc! { "_id": oid }, None).await?.ok_or_else(|| ApiError::not_found("Listing not found"))?;
			Some((oid.to_hex(), listing.title))
		}
		None => None,
	};

	let mut message = Message {
		id: None,
		sender_id: caller.id_hex(),
		sender_name: caller.user.username.clone(),
		recipient_id: recipient_id.to_hex(),
		recipient_name: recipient.username,
		content: body.content,
		listing_id: listing_title.as_ref().map(|(id, _)| id.clone()),
		listing_title: listing_title.map(|(_, title)| title),
		is_read: false,
		created_at: DateTime::now(),
	};
	let inserted = db.messages().insert_one(&message, None).await?;
	message.id = inserted.inserted_id.as_object_id();
	log::info!("message sent from {} to {}", message.sender_id, message.recipient_id);

	let view = MessageView::from(message);
	Ok(Json(json!({ "message": "Message sent successfully", "message_id": view.id, "message_data": view })))
}

pub async fn conversations(db: State<DbClient>, caller: AuthUser) -> ApiResult<Json<Value>> {
	let me = caller.id_hex();
	let options = FindOptions::builder().sort(doc! { "created_at": -1, "_id": -1 }).build();
	let messages: Vec<Message> = db
		.messages()
		.find(doc! { "$or": [ { "sender_id": &me }, { "recipient_id": &me } ] }, options)
		.await?
		.try_collect()
		.await?;
	Ok(Json(json!({ "conversations": group_conversations(&me, messages) })))
}

#[derive(Debug, Default, PartialEq)]
pub struct ThreadParams {
	pub limit: Option<i64>,
	pub before: Option<String>,
}

impl ThreadParams {
	pub fn from_pairs(pairs: &[(String, String)]) -> ApiResult<Self> {
		let before = pairs.iter().rev().find(|(k, v)| k == "before" && !v.trim().is_empty()).map(|(_, v)| v.trim().to_owned());
		Ok(ThreadParams { limit: number_param(pairs, "limit")?, before })
	}
}

pub async fn thread(
	db: State<DbClient>,
	caller: AuthUser,
	Path(user_id): Path<String>,
	Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Json<Value>> {
	let params = ThreadParams::from_pairs(&pairs)?;
	let limit = params.limit.unwrap_or(DEFAULT_THREAD_LIMIT);
	if !(1..=MAX_THREAD_LIMIT).contains(&limit) {
		return Err(ApiError::bad_request(format!("limit must be between 1 and {MAX_THREAD_LIMIT}")));
	}
	let (other, _) = find_user(&db, &user_id, "user").await?;

	let mut filter = between(&caller.id_hex(), &other.to_hex());
	if let Some(before) = params.before.as_deref().filter(|b| !b.is_empty()) {
		let before = parse_before(before)?;
		filter.insert("created_at", doc! { "$lt": before });
	}
	let options = FindOptions::builder().sort(doc! { "created_at": -1, "_id": -1 }).limit(limit).build();
	let mut messages: Vec<Message> = db.messages().find(filter, options).await?.try_collect().await?;
	messages.reverse();

	let messages: Vec<MessageView> = messages.into_iter().map(MessageView::from).collect();
	Ok(Json(json!({ "messages": messages })))
}

pub async fn mark_read(db: State<DbClient>, caller: AuthUser, Path(user_id): Path<String>) -> ApiResult<Json<Value>> {
	let other = parse_object_id(&user_id, "user")?;
	let result = db
		.messages()
		.update_many(
			doc! { "sender_id": other.to_hex(), "recipient_id": caller.id_hex(), "is_read": false },
			doc! { "$set": { "is_read": true } },
			None,
		)
		.await?;
	log::debug!("marked {} messages from {} as read", result.modified_count, other);
	Ok(Json(json!({ "marked_read": result.modified_count })))
}

pub async fn unread_count(db: State<DbClient>, caller: AuthUser) -> ApiResult<Json<Value>> {
	let count = db.messages().count_documents(doc! { "recipient_id": caller.id_hex(), "is_read": false }, None).await?;
	Ok(Json(json!({ "unread_count": count })))
}
