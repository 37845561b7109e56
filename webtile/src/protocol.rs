//! Wire protocol for the inter-process request channel.
//!
//! Requests arrive as text records: a single leading priority byte followed by
//! pipe-delimited fields. The grammar is preserved exactly at this boundary and
//! converted to typed commands for everything behind it:
//!
//! ```text
//! getimage|<replyChannel>|<host>|<hostPath>|<layer>|<style>|<format>|<imageSize>|<lat>|<lon>|<width>|<lod>
//! findinfo|<host>|<locationText>
//! getcapabilities|<host>|<hostPath>|<unusedField>
//! removerequests <requesterId>      (free-text, substring match)
//! terminate                          (free-text, substring match)
//! ```
//!
//! Latitude and longitude travel as integers scaled by 1e6; `width` is the
//! tile extent in the same scaled units.

use std::fmt;

use crate::error::ParseError;

/// Priority byte assigned to retried requests (lowest value in practice).
pub const RETRY_PRIORITY: u8 = b'0';

/// Divisor converting scaled integer coordinates to degrees.
pub const COORD_SCALE: f64 = 1_000_000.0;

// =============================================================================
// Requests
// =============================================================================

/// A `getimage` request: fetch the tile covering the given area.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    /// Channel name for the asynchronous reply.
    pub reply_channel: String,
    /// Remote service host.
    pub host: String,
    /// Path component of the GetMap endpoint on the host.
    pub host_path: String,
    /// WMS layer name.
    pub layer: String,
    /// WMS style name; a style containing `blank` requests no style.
    pub style: String,
    /// Image format (e.g. `image/png`).
    pub format: String,
    /// Requested output width and height in pixels.
    pub image_size: f64,
    /// Southern latitude, degrees scaled by 1e6.
    pub lat: i32,
    /// Western longitude, degrees scaled by 1e6.
    pub lon: i32,
    /// Tile extent in scaled degrees (applied to both axes).
    pub width: i32,
    /// Level of detail (zoom index).
    pub lod: i32,
}

/// Geographic bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl ImageRequest {
    /// Returns the bounding box this request covers, in degrees.
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox {
            west: f64::from(self.lon) / COORD_SCALE,
            south: f64::from(self.lat) / COORD_SCALE,
            east: f64::from(self.lon + self.width) / COORD_SCALE,
            north: f64::from(self.lat + self.width) / COORD_SCALE,
        }
    }
}

/// A `findinfo` request: geocode a free-text location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindInfoRequest {
    /// Geocoding service host.
    pub host: String,
    /// Free-text location to look up.
    pub query: String,
}

/// A `getcapabilities` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitiesRequest {
    pub host: String,
    pub host_path: String,
}

/// A parsed request or control message.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Stop both execution units and reply `OK`.
    Terminate,
    /// Drop all queued requests containing the requester id.
    RemoveRequests { requester: Option<String> },
    Image(ImageRequest),
    FindInfo(FindInfoRequest),
    Capabilities(CapabilitiesRequest),
}

// =============================================================================
// Parsing
// =============================================================================

/// Splits the leading priority byte from a request message.
///
/// Returns `None` for an empty message, or when the first character is wider
/// than one byte: the remainder would not be valid text, so the message is
/// dropped like any other malformed request.
pub fn split_priority(message: &str) -> Option<(u8, &str)> {
    let first = *message.as_bytes().first()?;
    let body = message.get(1..)?;
    Some((first, body))
}

/// Recognizes the free-text control messages.
///
/// Control messages are matched by substring on the raw text, before any
/// priority byte handling. The `removerequests` requester id starts at byte
/// offset 15 (after `"removerequests "`) and is only present when the message
/// is longer than 16 bytes.
pub fn classify_control(message: &str) -> Option<Command> {
    if message.contains("terminate") {
        return Some(Command::Terminate);
    }
    if message.contains("removerequests") {
        let requester = if message.len() > 16 {
            message.get(15..).map(str::to_string)
        } else {
            None
        };
        return Some(Command::RemoveRequests { requester });
    }
    None
}

/// Parses a pipe-delimited request (priority byte already removed).
///
/// Known commands with the wrong field count are an error so the caller can
/// drop them silently; unknown command names are a distinct error that draws
/// an `<unknowncommand>` reply.
pub fn parse_command(text: &str) -> Result<Command, ParseError> {
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    let fields: Vec<&str> = text.split('|').collect();
    let command = fields[0];

    match (command, fields.len()) {
        ("getimage", 12) => Ok(Command::Image(ImageRequest {
            reply_channel: fields[1].to_string(),
            host: fields[2].to_string(),
            host_path: fields[3].to_string(),
            layer: fields[4].to_string(),
            style: fields[5].to_string(),
            format: fields[6].to_string(),
            image_size: parse_f64(fields[7]),
            lat: parse_i32(fields[8]),
            lon: parse_i32(fields[9]),
            width: parse_i32(fields[10]),
            lod: parse_i32(fields[11]),
        })),
        ("findinfo", 3) => Ok(Command::FindInfo(FindInfoRequest {
            host: fields[1].to_string(),
            query: fields[2].to_string(),
        })),
        ("getcapabilities", 4) => Ok(Command::Capabilities(CapabilitiesRequest {
            host: fields[1].to_string(),
            host_path: fields[2].to_string(),
        })),
        ("getimage", n) => Err(field_count(command, 12, n)),
        ("findinfo", n) => Err(field_count(command, 3, n)),
        ("getcapabilities", n) => Err(field_count(command, 4, n)),
        (other, _) => Err(ParseError::UnknownCommand(other.to_string())),
    }
}

fn field_count(command: &str, expected: usize, actual: usize) -> ParseError {
    ParseError::FieldCount {
        command: command.to_string(),
        expected,
        actual,
    }
}

// Numeric fields tolerate garbage the way the wire always has: a value that
// fails to parse becomes zero rather than rejecting the whole request.
fn parse_i32(field: &str) -> i32 {
    field.trim().parse().unwrap_or(0)
}

fn parse_f64(field: &str) -> f64 {
    field.trim().parse().unwrap_or(0.0)
}

// =============================================================================
// Responses
// =============================================================================

/// A response message, serialized with `Display` into the exact wire form.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// The tile is on disk at `path`.
    File {
        lon: i32,
        lat: i32,
        lod: i32,
        path: String,
    },
    /// The tile is being downloaded asynchronously.
    Download { lon: i32, lat: i32, lod: i32 },
    /// Geocode result.
    Found { lat: f64, lon: f64 },
    /// Capabilities retrieval finished.
    Complete,
    /// The remote service produced no usable data.
    NoData,
    /// The command name was not recognized.
    UnknownCommand,
    /// Acknowledgment for control messages.
    Ok,
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::File {
                lon,
                lat,
                lod,
                path,
            } => write!(f, "<file> {} {} {} {}", lon, lat, lod, path),
            Response::Download { lon, lat, lod } => {
                write!(f, "<download> {} {} {}", lon, lat, lod)
            }
            Response::Found { lat, lon } => write!(f, "<found> {} {}", lat, lon),
            Response::Complete => write!(f, "<complete>"),
            Response::NoData => write!(f, "<error> NO DATA FROM SERVER"),
            Response::UnknownCommand => write!(f, "<unknowncommand>"),
            Response::Ok => write!(f, "OK"),
        }
    }
}
