//! Geometric and session data types shared across the wire protocol.
//!
//! Positions are metres in the session coordinate frame, rotations are unit
//! quaternions. All wire timestamps are unix seconds (`f64`) because pose
//! sources report sub-millisecond cadence.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Coordinates are rejected outside this bound (metres from session origin).
pub const MAX_COORDINATE: f64 = 1000.0;

/// Tolerance band for quaternion normalization on ingest.
const QUAT_MAGNITUDE_MIN: f64 = 0.9;
const QUAT_MAGNITUDE_MAX: f64 = 1.1;

/// 3D position vector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
}

impl Vec3 {
    /// Create a vector from components.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dz.mul_add(dz, dx.mul_add(dx, dy * dy)).sqrt()
    }

    /// All components finite and within [`MAX_COORDINATE`].
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.z].iter().all(|c| c.is_finite() && c.abs() <= MAX_COORDINATE)
    }
}

/// Rotation quaternion (x, y, z, w).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
    /// Z component.
    pub z: f64,
    /// W (scalar) component.
    pub w: f64,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    /// Identity rotation.
    pub const IDENTITY: Self = Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };

    /// Create a quaternion from components.
    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    /// Magnitude of the quaternion.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }

    /// Components finite, within [-1, 1], and magnitude near 1.
    pub fn is_valid(&self) -> bool {
        let components_ok =
            [self.x, self.y, self.z, self.w].iter().all(|c| c.is_finite() && c.abs() <= 1.0);
        let mag = self.magnitude();
        components_ok && (QUAT_MAGNITUDE_MIN..=QUAT_MAGNITUDE_MAX).contains(&mag)
    }

    /// Angular difference to another rotation, in degrees.
    ///
    /// Uses the quaternion dot product; antipodal quaternions represent the
    /// same rotation, so the absolute value is taken.
    pub fn angle_to_degrees(&self, other: &Self) -> f64 {
        let dot = (self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w).abs();
        let clamped = dot.min(1.0);
        2.0 * clamped.acos().to_degrees()
    }
}

/// Tracking state reported by the external pose source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    /// Pose source is still initializing.
    Initializing,
    /// Full 6DoF tracking.
    Tracking,
    /// Tracking lost; pose is stale or unreliable.
    Lost,
}

impl Default for TrackingState {
    fn default() -> Self {
        Self::Tracking
    }
}

/// A participant's instantaneous pose in the shared frame.
///
/// Ephemeral: every new update supersedes the previous one and nothing is
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Position in the session coordinate frame.
    pub position: Vec3,
    /// Orientation as a unit quaternion.
    pub rotation: Quat,
    /// Confidence score in [0, 1].
    pub confidence: f64,
    /// Pose source tracking state.
    #[serde(default)]
    pub tracking_state: TrackingState,
    /// Unix seconds when the pose was sampled.
    pub timestamp: f64,
}

impl Pose {
    /// Validate pose payload bounds before applying it to session state.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] on out-of-range components.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !self.position.is_valid() {
            return Err(ProtocolError::InvalidPayload {
                reason: "pose position out of bounds".to_string(),
            });
        }
        if !self.rotation.is_valid() {
            return Err(ProtocolError::InvalidPayload {
                reason: "pose rotation is not a unit quaternion".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.confidence) || !self.confidence.is_finite() {
            return Err(ProtocolError::InvalidPayload {
                reason: "pose confidence outside [0, 1]".to_string(),
            });
        }
        Ok(())
    }
}

/// Shared coordinate frame established by the host during colocalization.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CoordinateSystem {
    /// Origin of the shared frame.
    pub origin: Vec3,
    /// Orientation of the shared frame.
    pub rotation: Quat,
}

impl CoordinateSystem {
    /// Validate frame bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] on out-of-range components.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !self.origin.is_valid() || !self.rotation.is_valid() {
            return Err(ProtocolError::InvalidPayload {
                reason: "coordinate system out of bounds".to_string(),
            });
        }
        Ok(())
    }
}

/// Method used to establish the shared frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColocalizationMethod {
    /// Scanning a shared QR marker.
    QrCode,
    /// Visual feature matching.
    Visual,
    /// GPS-assisted alignment.
    Gps,
    /// Manual alignment by the user.
    Manual,
}

impl Default for ColocalizationMethod {
    fn default() -> Self {
        Self::QrCode
    }
}

/// Replicated spatial anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    /// Opaque anchor id.
    pub id: String,
    /// Participant who created the anchor.
    pub creator_id: String,
    /// Position in the session frame.
    pub position: Vec3,
    /// Orientation in the session frame.
    pub rotation: Quat,
    /// Opaque application metadata.
    #[serde(default)]
    pub metadata: std::collections::BTreeMap<String, String>,
    /// Unix seconds when created.
    pub created_at: f64,
    /// Unix seconds of the last mutation.
    pub updated_at: f64,
}

/// Maximum metadata entries accepted on an anchor.
pub const MAX_ANCHOR_METADATA_ENTRIES: usize = 32;

impl Anchor {
    /// Validate anchor payload bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] on out-of-range components
    /// or oversized metadata.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.id.is_empty() {
            return Err(ProtocolError::InvalidPayload { reason: "empty anchor id".to_string() });
        }
        if !self.position.is_valid() || !self.rotation.is_valid() {
            return Err(ProtocolError::InvalidPayload {
                reason: "anchor transform out of bounds".to_string(),
            });
        }
        if self.metadata.len() > MAX_ANCHOR_METADATA_ENTRIES {
            return Err(ProtocolError::InvalidPayload {
                reason: "anchor metadata too large".to_string(),
            });
        }
        Ok(())
    }
}

/// Roster entry inside a session snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    /// Session-scoped participant id.
    pub user_id: String,
    /// Display name.
    pub display_name: String,
    /// Whether the participant joined without an account.
    pub is_anonymous: bool,
    /// Whether this participant currently holds host authority.
    pub is_host: bool,
    /// Whether the participant has aligned to the shared frame.
    pub colocalized: bool,
    /// Unix seconds when the participant joined.
    pub join_time: f64,
}
