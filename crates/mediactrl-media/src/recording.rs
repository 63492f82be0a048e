//! WAV recording sink with a running header update on every appended
//! frame, so a reader that opens the file mid-recording (or after a
//! crash) sees a header consistent with however many bytes actually made
//! it to disk.

use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

const HEADER_LEN: u32 = 44;

/// A single-channel, 16-bit, 8 kHz PCM WAV file being appended to.
pub struct WavSink {
    file: std::fs::File,
    path: PathBuf,
    data_bytes_written: u32,
}

impl WavSink {
    /// Create (or, if `append` is true, open and seek to the end of) a WAV
    /// file at `path`.
    pub fn create(path: impl AsRef<Path>, append: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if append && path.exists() {
            let mut file = std::fs::OpenOptions::new().read(true).write(true).open(&path)?;
            let len = file.metadata()?.len() as u32;
            let data_bytes_written = len.saturating_sub(HEADER_LEN);
            file.seek(SeekFrom::End(0))?;
            return Ok(Self {
                file,
                path,
                data_bytes_written,
            });
        }

        let mut file = std::fs::File::create(&path)?;
        write_header(&mut file, 0)?;
        Ok(Self {
            file,
            path,
            data_bytes_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u32 {
        self.data_bytes_written
    }

    /// Append one frame of linear PCM samples and update the header in
    /// place so `riff.len` and `data.blocksize` always reflect what has
    /// actually been flushed.
    pub fn append_frame(&mut self, samples: &[i16]) -> Result<()> {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for &sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }

        self.file.write_all(&bytes)?;
        self.data_bytes_written += bytes.len() as u32;
        self.rewrite_header()?;
        Ok(())
    }

    fn rewrite_header(&mut self) -> Result<()> {
        let pos = self.file.stream_position()?;
        self.file.seek(SeekFrom::Start(0))?;
        write_header(&mut self.file, self.data_bytes_written)?;
        self.file.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<PathBuf> {
        self.file.flush()?;
        Ok(self.path)
    }
}

fn write_header(w: &mut impl Write, data_len: u32) -> Result<()> {
    const SAMPLE_RATE: u32 = 8000;
    const CHANNELS: u16 = 1;
    const BITS_PER_SAMPLE: u16 = 16;
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = SAMPLE_RATE * block_align as u32;

    w.write_all(b"RIFF")?;
    w.write_all(&(36 + data_len).to_le_bytes())?;
    w.write_all(b"WAVE")?;
    w.write_all(b"fmt ")?;
    w.write_all(&16u32.to_le_bytes())?;
    w.write_all(&1u16.to_le_bytes())?; // PCM
    w.write_all(&CHANNELS.to_le_bytes())?;
    w.write_all(&SAMPLE_RATE.to_le_bytes())?;
    w.write_all(&byte_rate.to_le_bytes())?;
    w.write_all(&block_align.to_le_bytes())?;
    w.write_all(&BITS_PER_SAMPLE.to_le_bytes())?;
    w.write_all(b"data")?;
    w.write_all(&data_len.to_le_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_reflects_appended_frame_count() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("mediactrl-wavsink-test-{}.wav", std::process::id()));
        let mut sink = WavSink::create(&path, false).unwrap();

        for _ in 0..3 {
            sink.append_frame(&[0i16; 160]).unwrap();
        }
        assert_eq!(sink.bytes_written(), 320 * 3);

        let path = sink.finish().unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let riff_len = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let data_len = u32::from_le_bytes(bytes[40..44].try_into().unwrap());
        assert_eq!(riff_len, 36 + 320 * 3);
        assert_eq!(data_len, 320 * 3);

        std::fs::remove_file(&path).ok();
    }
}
