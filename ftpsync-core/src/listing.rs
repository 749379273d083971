use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Dir,
}

/// One child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub entry_type: EntryType,
    pub size: u64,
    pub modified: Option<OffsetDateTime>,
}

impl ListEntry {
    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Dir
    }
}

/// Parses one RFC 3659 `MLSD` line (`type=file;size=12;modify=20240101120000; name`).
///
/// Returns `None` for `cdir`/`pdir` entries, links and other non-regular types.
pub(crate) fn parse_mlsd_line(line: &str) -> Option<ListEntry> {
    let (facts, name) = line.split_once(' ')?;
    if name.is_empty() {
        return None;
    }

    let mut entry_type = None;
    let mut size = 0;
    let mut modified = None;
    for fact in facts.split(';') {
        let Some((key, value)) = fact.split_once('=') else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "type" => {
                entry_type = match value.to_ascii_lowercase().as_str() {
                    "file" => Some(EntryType::File),
                    "dir" => Some(EntryType::Dir),
                    _ => return None,
                }
            }
            "size" => size = value.parse().unwrap_or(0),
            "modify" => modified = parse_mlsd_time(value),
            _ => {}
        }
    }

    Some(ListEntry {
        name: name.to_string(),
        entry_type: entry_type?,
        size,
        modified,
    })
}

/// Parses one Unix-style `LIST` line (`-rw-r--r-- 1 owner group 1234 Jan 15 10:30 name`).
///
/// Entries without a year are placed in the latest year, starting at the year of `now`, in
/// which the date exists and is at most a day in the future. Listing times carry no zone;
/// UTC is assumed. Exactly one blank separates the time column from the name, so names keep
/// their own leading spaces.
pub(crate) fn parse_unix_line(line: &str, now: OffsetDateTime) -> Option<ListEntry> {
    let mut fields = [""; 8];
    let mut rest = line;
    for slot in fields.iter_mut() {
        let (token, tail) = next_token(rest)?;
        *slot = token;
        rest = tail;
    }
    let name = rest.strip_prefix([' ', '\t'])?;
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }

    let entry_type = match fields[0].chars().next()? {
        '-' => EntryType::File,
        'd' => EntryType::Dir,
        _ => return None,
    };
    Some(ListEntry {
        name: name.to_string(),
        entry_type,
        size: fields[4].parse().ok()?,
        modified: parse_unix_time(fields[5], fields[6], fields[7], now),
    })
}

fn next_token(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    let end = input.find(char::is_whitespace).unwrap_or(input.len());
    Some((&input[..end], &input[end..]))
}

fn parse_mlsd_time(value: &str) -> Option<OffsetDateTime> {
    let (whole, fraction) = value.split_once('.').unwrap_or((value, ""));
    let parsed = PrimitiveDateTime::parse(
        whole,
        format_description!("[year][month][day][hour][minute][second]"),
    )
    .ok()?
    .assume_utc();
    if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Some(parsed);
    }
    let millis: i64 = format!("{:0<3}", &fraction[..fraction.len().min(3)])
        .parse()
        .ok()?;
    Some(parsed + time::Duration::milliseconds(millis))
}

fn parse_unix_time(month: &str, day: &str, clock_or_year: &str, now: OffsetDateTime) -> Option<OffsetDateTime> {
    let month = parse_month(month)?;
    let day: u8 = day.parse().ok()?;
    match clock_or_year.split_once(':') {
        Some((hour, minute)) => {
            let clock = Time::from_hms(hour.parse().ok()?, minute.parse().ok()?, 0).ok()?;
            let latest = now + time::Duration::days(1);
            // Eight years back always reaches a leap year for Feb 29.
            (0..=8).find_map(|back| {
                let at = Date::from_calendar_date(now.year() - back, month, day)
                    .ok()?
                    .with_time(clock)
                    .assume_utc();
                (at <= latest).then_some(at)
            })
        }
        None => {
            let year = clock_or_year.parse().ok()?;
            Some(
                Date::from_calendar_date(year, month, day)
                    .ok()?
                    .midnight()
                    .assume_utc(),
            )
        }
    }
}

fn parse_month(value: &str) -> Option<Month> {
    let month = match value.to_ascii_lowercase().as_str() {
        "jan" => Month::January,
        "feb" => Month::February,
        "mar" => Month::March,
        "apr" => Month::April,
        "may" => Month::May,
        "jun" => Month::June,
        "jul" => Month::July,
        "aug" => Month::August,
        "sep" => Month::September,
        "oct" => Month::October,
        "nov" => Month::November,
        "dec" => Month::December,
        _ => return None,
    };
    Some(month)
}
