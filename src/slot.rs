use chrono::NaiveDate;
use thiserror::Error;

pub const SLOT_FORMAT_HINT: &str =
    "Expected resourceId:YYYY-MM-DD:YYYY-MM-DD:g<guests> with the end date after the start date.";

/// A parsed slot identifier: a resource plus a half-open `[range_start, range_end)` date range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub resource_id: String,
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
    pub guests: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("Invalid slotId: empty. {hint}", hint = SLOT_FORMAT_HINT)]
    Empty,
    #[error("Invalid slotId '{0}'. {hint}", hint = SLOT_FORMAT_HINT)]
    Malformed(String),
    #[error("Invalid slotId: '{0}' is not a calendar date. {hint}", hint = SLOT_FORMAT_HINT)]
    InvalidDate(String),
    #[error("Invalid slotId: range {start}..{end} is empty or inverted. {hint}", hint = SLOT_FORMAT_HINT)]
    InvertedRange { start: NaiveDate, end: NaiveDate },
    #[error("Invalid slotId: guest segment '{0}' must be g<positive integer>. {hint}", hint = SLOT_FORMAT_HINT)]
    InvalidGuests(String),
}

impl Slot {
    /// Parses `<resourceId>:<YYYY-MM-DD>:<YYYY-MM-DD>:g<guests>`, trimming surrounding whitespace.
    pub fn parse(slot_id: &str) -> Result<Self, SlotError> {
        let trimmed = slot_id.trim();
        if trimmed.is_empty() {
            return Err(SlotError::Empty);
        }

        let parts: Vec<&str> = trimmed.split(':').collect();
        let [resource_id, start, end, guests] = parts.as_slice() else {
            return Err(SlotError::Malformed(trimmed.to_string()));
        };
        if resource_id.is_empty() {
            return Err(SlotError::Malformed(trimmed.to_string()));
        }

        let range_start = parse_date(start)?;
        let range_end = parse_date(end)?;
        if range_end <= range_start {
            return Err(SlotError::InvertedRange {
                start: range_start,
                end: range_end,
            });
        }

        let guests = parse_guests(guests)?;

        Ok(Self {
            resource_id: (*resource_id).to_string(),
            range_start,
            range_end,
            guests,
        })
    }

    /// Canonical string form, as stored on the booking row.
    pub fn slot_id(&self) -> String {
        format!(
            "{}:{}:{}:g{}",
            self.resource_id,
            self.range_start.format("%Y-%m-%d"),
            self.range_end.format("%Y-%m-%d"),
            self.guests
        )
    }

}

fn parse_date(raw: &str) -> Result<NaiveDate, SlotError> {
    // chrono accepts unpadded fields; the wire format is strictly zero-padded.
    let shaped = raw.len() == 10
        && raw
            .char_indices()
            .all(|(i, c)| if i == 4 || i == 7 { c == '-' } else { c.is_ascii_digit() });
    if !shaped {
        return Err(SlotError::InvalidDate(raw.to_string()));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| SlotError::InvalidDate(raw.to_string()))
}

/// Guest counts must fit the `guests INTEGER` column as-is.
fn parse_guests(raw: &str) -> Result<i32, SlotError> {
    let digits = raw
        .strip_prefix('g')
        .filter(|d| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| SlotError::InvalidGuests(raw.to_string()))?;
    match digits.parse::<i32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(SlotError::InvalidGuests(raw.to_string())),
    }
}
