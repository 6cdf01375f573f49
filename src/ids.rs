//! Identifier generation and time/formatting helpers.
//!
//! Small, stateless utilities shared by the relay, the agent, and the
//! watcher.

use rand::Rng;

/// Ambiguity-free alphabet for room codes: no `0`, `1`, `I`, `L`, `O`.
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const ROOM_CODE_LEN: usize = 6;

/// URL-safe alphabet used for device identifiers.
const DEVICE_ID_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
const DEVICE_ID_LEN: usize = 16;

/// Generates a fresh room code of the form `HIVE-XXXXXX`.
pub fn generate_room_code() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect();
    format!("HIVE-{suffix}")
}

/// Validates a room code against `^HIVE-[ABCDEFGHJKMNPQRSTUVWXYZ23456789]{6}$`.
pub fn is_valid_room_code(code: &str) -> bool {
    let Some(suffix) = code.strip_prefix("HIVE-") else {
        return false;
    };
    suffix.len() == ROOM_CODE_LEN
        && suffix
            .bytes()
            .all(|b| ROOM_CODE_ALPHABET.contains(&b))
}

/// Generates a fresh 16-character URL-safe device identifier, unique per
/// agent session (not per machine).
pub fn generate_device_id() -> String {
    let mut rng = rand::thread_rng();
    (0..DEVICE_ID_LEN)
        .map(|_| DEVICE_ID_ALPHABET[rng.gen_range(0..DEVICE_ID_ALPHABET.len())] as char)
        .collect()
}

/// Current time as integer milliseconds since the epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Builds the `codehive://` invite URI for a room, appending `?password=`
/// (URL-encoded) when a password is set.
pub fn invite_uri(host: &str, port: u16, code: &str, password: Option<&str>) -> String {
    let mut uri = format!("codehive://{host}:{port}/join/{code}");
    if let Some(pw) = password {
        uri.push_str("?password=");
        uri.push_str(&urlencoding::encode(pw));
    }
    uri
}
