use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Frame one record as `[u32 len][bincode payload][u32 crc32]`, little-endian.
fn write_frame<R: Serialize>(writer: &mut impl Write, record: &R) -> io::Result<()> {
    let payload = bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record larger than 4 GiB"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// `Ok(None)` on a clean or torn end of file.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<Option<()>> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(Some(())),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Read the next intact frame. `Ok(None)` stops replay: end of file, a torn
/// write, a checksum mismatch, or an undecodable payload.
fn read_frame<R: DeserializeOwned>(reader: &mut impl Read) -> io::Result<Option<(R, u64)>> {
    let mut len_buf = [0u8; 4];
    if read_exact_or_eof(reader, &mut len_buf)?.is_none() {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    if read_exact_or_eof(reader, &mut payload)?.is_none() {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if read_exact_or_eof(reader, &mut crc_buf)?.is_none() {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    match bincode::deserialize::<R>(&payload) {
        Ok(record) => Ok(Some((record, (len + 8) as u64))),
        Err(_) => Ok(None),
    }
}

/// What replay recovered from a log file.
#[derive(Debug)]
pub struct Replay<R> {
    pub records: Vec<R>,
    /// Length of the intact prefix; appends must resume here.
    pub valid_len: u64,
    /// Bytes after the last intact frame, left by a crash mid-append.
    pub discarded_bytes: u64,
}

/// Append-only log of `R` records with group-commit friendly buffering.
///
/// A torn or corrupt tail is discarded on replay; everything before it is kept.
pub struct Wal<R> {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    _record: PhantomData<fn(R)>,
}

impl<R: Serialize + DeserializeOwned> Wal<R> {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            _record: PhantomData,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, record: &R) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Buffer a record. Nothing is durable until [`Wal::flush_sync`].
    pub fn append_buffered(&mut self, record: &R) -> io::Result<()> {
        write_frame(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.compact")
    }

    /// Write the snapshot to a side file and fsync it. Slow; the live log is untouched.
    pub fn write_compact_file(path: &Path, records: &[R]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        for record in records {
            write_frame(&mut writer, record)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the side file over the live log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, records: &[R]) -> io::Result<()> {
        Self::write_compact_file(&self.path, records)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact record. A missing file replays as empty.
    pub fn replay(path: &Path) -> io::Result<Replay<R>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Replay {
                    records: Vec::new(),
                    valid_len: 0,
                    discarded_bytes: 0,
                });
            }
            Err(e) => return Err(e),
        };
        let total = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut consumed = 0u64;
        while let Some((record, frame_len)) = read_frame::<R>(&mut reader)? {
            records.push(record);
            consumed += frame_len;
        }
        Ok(Replay {
            records,
            valid_len: consumed,
            discarded_bytes: total.saturating_sub(consumed),
        })
    }

    /// Cut the log back to its intact prefix so new frames follow the last
    /// good one instead of the garbage a crash left behind.
    pub fn truncate_to(path: &Path, valid_len: u64) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(valid_len)?;
        file.sync_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn hall() -> BookableResource {
        BookableResource::new(
            ResourceKey::Venue {
                property_id: "p1".into(),
                venue_id: "hall".into(),
            },
            Some(1000.0),
        )
    }

    fn window(id: Ulid) -> Event {
        let d = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        Event::MaintenanceAdded {
            window: MaintenanceWindow {
                id,
                resource: hall().key.inventory_key(),
                start_date: d,
                end_date: d,
                active: true,
                reason: None,
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![Event::ResourceUpserted { resource: hall() }, window(Ulid::new())];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        let replay = Wal::<Event>::replay(&path).unwrap();
        assert_eq!(replay.records, events);
        assert_eq!(replay.discarded_bytes, 0);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn torn_tail_is_discarded() {
        let path = tmp_path("torn_tail.wal");
        let event = Event::ResourceUpserted { resource: hall() };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8; 6]).unwrap();
        }
        let replay = Wal::<Event>::replay(&path).unwrap();
        assert_eq!(replay.records, vec![event]);
        assert_eq!(replay.discarded_bytes, 6);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn appends_after_truncation_replay() {
        let path = tmp_path("truncate_then_append.wal");
        let first = Event::ResourceUpserted { resource: hall() };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8; 6]).unwrap();
        }

        let replay = Wal::<Event>::replay(&path).unwrap();
        Wal::<Event>::truncate_to(&path, replay.valid_len).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), replay.valid_len);

        let second = window(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&second).unwrap();
        }
        let replay = Wal::<Event>::replay(&path).unwrap();
        assert_eq!(replay.records, vec![first, second]);
        assert_eq!(replay.discarded_bytes, 0);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_replays_empty() {
        let path = tmp_path("never_written.wal");
        let replay = Wal::<Event>::replay(&path).unwrap();
        assert!(replay.records.is_empty());
    }

    #[test]
    fn checksum_mismatch_stops_replay() {
        let path = tmp_path("bad_crc.wal");
        let event = Event::RuleRemoved { id: Ulid::new() };
        {
            let payload = bincode::serialize(&event).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xBAD0_C0DEu32.to_le_bytes()).unwrap();
        }
        let replay = Wal::<Event>::replay(&path).unwrap();
        assert!(replay.records.is_empty());
        assert!(replay.discarded_bytes > 0);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compaction_shrinks_and_keeps_appending() {
        let path = tmp_path("compact.wal");
        let resource = Event::ResourceUpserted { resource: hall() };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&resource).unwrap();
            for _ in 0..20 {
                let id = Ulid::new();
                wal.append(&window(id)).unwrap();
                wal.append(&Event::MaintenanceRemoved {
                    id,
                    inventory: hall().key.inventory_key(),
                })
                .unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        let later = window(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(std::slice::from_ref(&resource)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&later).unwrap();
        }
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted log should shrink: {after} < {before}");

        let replay = Wal::<Event>::replay(&path).unwrap();
        assert_eq!(replay.records, vec![resource, later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_appends_durable_after_flush() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (0..5).map(|_| Event::RuleRemoved { id: Ulid::new() }).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::<Event>::replay(&path).unwrap().records, events);
        let _ = fs::remove_file(&path);
    }
}
