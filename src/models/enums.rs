use serde::{Deserialize, Serialize};

use super::ModelError;

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(ModelError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(DocumentType {
    License => "LICENSE",
    Certificate => "CERTIFICATE",
    Experience => "EXPERIENCE",
});

str_enum!(VerificationStatus {
    Uploaded => "UPLOADED",
    Pending => "PENDING",
    Verified => "VERIFIED",
    Rejected => "REJECTED",
});

str_enum!(VerificationOutcome {
    Verified => "VERIFIED",
    Rejected => "REJECTED",
});

str_enum!(MediaType {
    Pdf => "pdf",
    Jpeg => "jpeg",
    Png => "png",
});

impl DocumentType {
    pub const ALL: [DocumentType; 3] = [Self::License, Self::Certificate, Self::Experience];

    /// Slots that must be filled before documents can be submitted for review.
    pub const REQUIRED: [DocumentType; 2] = [Self::License, Self::Certificate];

    pub fn is_required(&self) -> bool {
        Self::REQUIRED.contains(self)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::License => "Medical license",
            Self::Certificate => "Board certificate",
            Self::Experience => "Experience letter",
        }
    }
}

impl VerificationStatus {
    /// Received by the server and waiting for (or under) review.
    /// `UPLOADED` and `PENDING` gate identically.
    pub fn is_submitted(&self) -> bool {
        matches!(self, Self::Uploaded | Self::Pending)
    }

    /// Legal edges of the document lifecycle.
    ///
    /// A reviewer decision may land on any non-verified document, including a
    /// rejected one (bulk decisions target everything not yet verified).
    /// `VERIFIED` has no outgoing edge.
    pub fn can_transition_to(&self, next: VerificationStatus) -> bool {
        match (self, next) {
            (Self::Verified, _) => false,
            (Self::Uploaded, Self::Pending) => true,
            (_, Self::Verified | Self::Rejected) => true,
            _ => false,
        }
    }
}

impl From<VerificationOutcome> for VerificationStatus {
    fn from(outcome: VerificationOutcome) -> Self {
        match outcome {
            VerificationOutcome::Verified => Self::Verified,
            VerificationOutcome::Rejected => Self::Rejected,
        }
    }
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

impl MediaType {
    /// Narrow a declared media type into the supported set.
    ///
    /// Accepts bare extensions (`pdf`, `jpg`, `.png`) and MIME strings
    /// (`application/pdf`, `image/jpeg`); matching is case-insensitive and
    /// MIME parameters are ignored.
    pub fn from_declared(declared: &str) -> Option<Self> {
        let essence = declared.split(';').next().unwrap_or("").trim();
        let lowered = essence.trim_start_matches('.').to_ascii_lowercase();
        match lowered.as_str() {
            "pdf" | "application/pdf" => Some(Self::Pdf),
            "jpeg" | "jpg" | "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "png" | "image/png" => Some(Self::Png),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Jpeg | Self::Png)
    }

    /// Detect media type from file magic bytes (not extension or declared type).
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        // PDF: %PDF
        if bytes.starts_with(b"%PDF") {
            return Some(Self::Pdf);
        }
        // JPEG: FF D8 FF
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }
        // PNG: 89 50 4E 47
        if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
            return Some(Self::Png);
        }
        None
    }
}
