use std::{
	collections::HashMap,
	path::{Path as FsPath, PathBuf},
};

use anyhow::Context;
use axum::{
	body::{Body, Bytes},
	extract::{Multipart, Path, State},
	http::header,
	response::IntoResponse,
};
use hyper::StatusCode;
use image::ImageFormat;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::error::{ApiError, ApiResult};

/// Local directory holding uploaded listing images.
#[derive(Clone, Debug)]
pub struct Uploads {
	dir: PathBuf,
}

impl Uploads {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Uploads { dir: dir.into() }
	}

	/// Creates the directory if needed and checks that it is writable.
	pub async fn ensure(&self) -> anyhow::Result<()> {
		tokio::fs::create_dir_all(&self.dir)
			.await
			.with_context(|| format!("failed to create upload directory {}", self.dir.display()))?;
		let probe = self.dir.join(".write_probe");
		tokio::fs::write(&probe, b"ok")
			.await
			.with_context(|| format!("upload directory {} is not writable", self.dir.display()))?;
		tokio::fs::remove_file(&probe).await.ok();
		log::info!("uploads stored in {}", self.dir.display());
		Ok(())
	}

	/// Resolves a stored file name, refusing anything that could escape the
	/// upload directory.
	pub fn path(&self, name: &str) -> Option<PathBuf> {
		let valid = !name.is_empty()
			&& !name.starts_with('.')
			&& name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
		valid.then(|| self.dir.join(name))
	}

	/// Stores an uploaded image under a fresh uuid name. The extension comes
	/// from the sniffed content, not from the client's file name.
	pub async fn save_image(&self, data: &[u8]) -> ApiResult<String> {
		let format = image::guess_format(data).map_err(|_| ApiError::bad_request("Uploaded file is not a supported image"))?;
		image::load_from_memory_with_format(data, format).map_err(|_| ApiError::bad_request("Uploaded image could not be decoded"))?;
		let extension = format.extensions_str().first().copied().unwrap_or("img");
		let name = format!("{}.{}", uuid::Uuid::new_v4().simple(), extension);
		tokio::fs::write(self.dir.join(&name), data).await?;
		log::info!("image saved: {}", name);
		Ok(name)
	}

	pub async fn delete(&self, name: &str) -> bool {
		let Some(path) = self.path(name) else {
			return false;
		};
		match tokio::fs::remove_file(&path).await {
			Ok(_) => true,
			Err(e) => {
				log::warn!("could not delete image {}: {}", name, e);
				false
			}
		}
	}
}

/// A multipart body split into its text fields and its file parts.
#[derive(Debug, Default)]
pub struct FormData {
	pub fields: HashMap<String, String>,
	pub files: Vec<(String, Bytes)>,
}

impl FormData {
	pub fn file(&self, name: &str) -> Option<&Bytes> {
		self.files.iter().find(|(field, _)| field == name).map(|(_, data)| data)
	}

	pub fn flag(&self, name: &str) -> bool {
		self.fields.get(name).is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"))
	}
}

pub async fn read_form(mut multipart: Multipart) -> ApiResult<FormData> {
	let mut form = FormData::default();
	while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {e}")))? {
		let name = field.name().unwrap_or_default().to_owned();
		if field.file_name().is_some() {
			let data = field.bytes().await.map_err(|e| ApiError::bad_request(format!("Failed to read upload: {e}")))?;
			if !data.is_empty() {
				form.files.push((name, data));
			}
		} else {
			let text = field.text().await.map_err(|e| ApiError::bad_request(format!("Failed to read field {name}: {e}")))?;
			form.fields.insert(name, text.trim_matches('"').to_owned());
		}
	}
	Ok(form)
}

pub async fn file_handler(uploads: State<Uploads>, Path(file): Path<String>) -> ApiResult<impl IntoResponse> {
	let path = uploads.path(&file).ok_or_else(|| ApiError::bad_request("Invalid file name"))?;
	let stream = read_file_stream(&path).await.ok_or_else(|| ApiError::not_found("Image not found"))?;
	let mime = ImageFormat::from_path(&path).map(|f| f.to_mime_type()).unwrap_or("application/octet-stream");

	Ok((StatusCode::OK, [(header::CONTENT_TYPE, mime)], Body::from_stream(stream)))
}

pub async fn read_file_stream(path: &FsPath) -> Option<ReaderStream<File>> {
	File::open(path).await.map(ReaderStream::new).ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	pub(crate) fn png_bytes() -> Vec<u8> {
		let img = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 30, 30]));
		let mut out = std::io::Cursor::new(Vec::new());
		img.write_to(&mut out, ImageFormat::Png).unwrap();
		out.into_inner()
	}

	#[test]
	fn form_flags() {
		let mut form = FormData::default();
		form.fields.insert("enhance_contrast".to_owned(), "True".to_owned());
		form.fields.insert("remove_background".to_owned(), "false".to_owned());
		assert!(form.flag("enhance_contrast"));
		assert!(!form.flag("remove_background"));
		assert!(!form.flag("focus_on_damage"));
	}

	#[test]
	fn path_rejects_traversal() {
		let uploads = Uploads::new("/srv/uploads");
		assert!(uploads.path("abc.png").is_some());
		assert!(uploads.path("../etc/passwd").is_none());
		assert!(uploads.path("a/b.png").is_none());
		assert!(uploads.path(".hidden").is_none());
		assert!(uploads.path("").is_none());
	}

	#[tokio::test]
	async fn saves_and_deletes_images() {
		let dir = tempfile::tempdir().unwrap();
		let uploads = Uploads::new(dir.path());
		uploads.ensure().await.unwrap();

		let name = uploads.save_image(&png_bytes()).await.unwrap();
		assert!(name.ends_with(".png"));
		assert!(dir.path().join(&name).exists());
		assert!(read_file_stream(&dir.path().join(&name)).await.is_some());

		assert!(uploads.delete(&name).await);
		assert!(!dir.path().join(&name).exists());
		assert!(!uploads.delete(&name).await);
	}

	#[tokio::test]
	async fn rejects_non_images() {
		let dir = tempfile::tempdir().unwrap();
		let uploads = Uploads::new(dir.path());
		let err = uploads.save_image(b"definitely not an image").await.unwrap_err();
		assert!(matches!(err, ApiError::BadRequest(_)));
	}
}
