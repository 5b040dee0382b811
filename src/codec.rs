//! Frame format used to ship metrics over HTTP.
//!
//! ```text
//! u16 name length | name bytes | u16 sample count | count * (u64 time, f64 value)
//! ```
//!
//! All integers are big-endian.

use std::io::{self, Write};

use crate::{Metric, Time};

pub const SAMPLE_SIZE: usize = 16;
pub const MAX_FRAME_SAMPLES: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub time: Time,
    pub value: f64,
}
impl From<&Metric> for Sample {
    fn from(metric: &Metric) -> Self {
        Self {
            time: metric.timestamp,
            value: metric.value,
        }
    }
}

pub fn encode_key(wtr: &mut impl Write, key: &str) -> io::Result<()> {
    let len = u16::try_from(key.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "metric name longer than u16::MAX")
    })?;
    wtr.write_all(&len.to_be_bytes())?;
    wtr.write_all(key.as_bytes())
}

/// Reads the rest of a key whose length has already been read.
async fn decode_key_body<R>(rdr: &mut R, len: u16, key: &mut String) -> io::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;
    let mut buf = std::mem::take(key).into_bytes();
    buf.clear();
    buf.resize(usize::from(len), 0);
    rdr.read_exact(&mut buf).await?;
    *key = String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(())
}

pub fn encode_sample(sample: Sample) -> [u8; SAMPLE_SIZE] {
    let mut buf = [0; SAMPLE_SIZE];
    buf[..8].copy_from_slice(&sample.time.to_be_bytes());
    buf[8..].copy_from_slice(&sample.value.to_be_bytes());
    buf
}
pub fn decode_sample(buf: [u8; SAMPLE_SIZE]) -> Sample {
    let mut time = [0; 8];
    time.copy_from_slice(&buf[..8]);
    let mut value = [0; 8];
    value.copy_from_slice(&buf[8..]);
    Sample {
        time: u64::from_be_bytes(time),
        value: f64::from_be_bytes(value),
    }
}

/// Writes one frame. `samples` must not exceed [`MAX_FRAME_SAMPLES`].
pub fn encode_frame(wtr: &mut impl Write, key: &str, samples: &[Sample]) -> io::Result<()> {
    let count = u16::try_from(samples.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many samples in frame"))?;
    encode_key(wtr, key)?;
    wtr.write_all(&count.to_be_bytes())?;
    for &sample in samples {
        wtr.write_all(&encode_sample(sample))?;
    }
    Ok(())
}

/// Reads one frame into `key` and `samples`, replacing their contents.
///
/// Returns `Ok(false)` on a clean end of stream before the frame starts; a
/// stream that ends inside a frame is an `UnexpectedEof` error.
pub async fn decode_frame<R>(
    rdr: &mut R,
    key: &mut String,
    samples: &mut Vec<Sample>,
) -> io::Result<bool>
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;
    let mut len = [0; 2];
    if rdr.read(&mut len[..1]).await? == 0 {
        return Ok(false);
    }
    rdr.read_exact(&mut len[1..]).await?;
    decode_key_body(rdr, u16::from_be_bytes(len), key).await?;
    let count = rdr.read_u16().await?;
    samples.clear();
    for _ in 0..count {
        let mut sample = [0; SAMPLE_SIZE];
        rdr.read_exact(&mut sample).await?;
        samples.push(decode_sample(sample));
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_layout_is_big_endian() {
        let buf = encode_sample(Sample {
            time: 1,
            value: 1.0,
        });
        assert_eq!(&buf[..8], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(&buf[8..], &1.0f64.to_be_bytes());
    }

    #[tokio::test]
    async fn frames_decode_in_sequence() {
        let mut buf = vec![];
        let a = [Sample { time: 1, value: 0.5 }, Sample { time: 2, value: -3.0 }];
        encode_frame(&mut buf, "gauge.a", &a).unwrap();
        encode_frame(&mut buf, "counter.b", &[]).unwrap();

        let mut rdr = &buf[..];
        let mut key = String::new();
        let mut samples = vec![];
        assert!(decode_frame(&mut rdr, &mut key, &mut samples).await.unwrap());
        assert_eq!(key, "gauge.a");
        assert_eq!(samples, a);
        assert!(decode_frame(&mut rdr, &mut key, &mut samples).await.unwrap());
        assert_eq!(key, "counter.b");
        assert!(samples.is_empty());
        assert!(!decode_frame(&mut rdr, &mut key, &mut samples).await.unwrap());
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let mut buf = vec![];
        encode_frame(&mut buf, "gauge.a", &[Sample { time: 1, value: 1.0 }]).unwrap();
        buf.truncate(buf.len() - 4);
        let mut rdr = &buf[..];
        let err = decode_frame(&mut rdr, &mut String::new(), &mut vec![])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn oversized_name_is_rejected() {
        let name = "x".repeat(usize::from(u16::MAX) + 1);
        let err = encode_key(&mut vec![], &name).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
