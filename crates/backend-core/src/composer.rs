use url::Url;

use crate::{
    error::BackendError,
    types::{Attachment, PickedImage},
};

/// Pending input buffer and its editable flag.
///
/// A send locks the input with [`Composer::begin_send`]. The buffer is only
/// cleared by [`Composer::finish_enqueued`]; every failure path restores
/// editability and leaves the text untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composer {
    text: String,
    editable: bool,
}

impl Default for Composer {
    fn default() -> Self {
        Self {
            text: String::new(),
            editable: true,
        }
    }
}

impl Composer {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_editable(&self) -> bool {
        self.editable
    }

    /// Replace the buffer. Ignored while a send holds the input.
    pub fn set_text(&mut self, text: impl Into<String>) {
        if self.editable {
            self.text = text.into();
        }
    }

    /// Lock the input while a send is prepared.
    pub fn begin_send(&mut self) {
        self.editable = false;
    }

    /// Clear the buffer and unlock after the send was enqueued.
    pub fn finish_enqueued(&mut self) {
        self.text.clear();
        self.editable = true;
    }

    /// Unlock without touching the buffer.
    pub fn restore(&mut self) {
        self.editable = true;
    }
}

/// Reject text that is empty or whitespace-only.
pub fn validate_message_text(text: &str) -> Result<(), BackendError> {
    if text.trim().is_empty() {
        return Err(BackendError::empty_message());
    }
    Ok(())
}

/// Resolved picker source ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource {
    /// Local source URI to upload from.
    pub uri: String,
    pub width: u32,
    pub height: u32,
}

impl ImageSource {
    /// Attach the durable URI returned by the blob store.
    pub fn into_attachment(self, durable_uri: String) -> Attachment {
        Attachment {
            uri: durable_uri,
            width: self.width,
            height: self.height,
        }
    }
}

/// Resolve a picker result.
///
/// `Ok(None)` means the picker was cancelled and nothing should be sent.
pub fn resolve_picked_image(image: &PickedImage) -> Result<Option<ImageSource>, BackendError> {
    let PickedImage::Picked { uri, width, height } = image else {
        return Ok(None);
    };

    let Some(uri) = uri.as_deref().map(str::trim).filter(|uri| !uri.is_empty()) else {
        return Err(BackendError::attachment(
            "attachment_missing_uri",
            "Error occurred with the image",
        ));
    };

    Url::parse(uri).map_err(|err| {
        BackendError::attachment(
            "attachment_invalid_uri",
            format!("image source '{uri}' is not a valid URI: {err}"),
        )
    })?;

    Ok(Some(ImageSource {
        uri: uri.to_owned(),
        width: *width,
        height: *height,
    }))
}
