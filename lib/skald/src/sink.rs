// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The byte destination at the end of the pipeline.

/// A sink write failed. What that means is up to the platform adapter,
/// which receives it through [`crate::platform::Platform::error`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SinkError;

/// Transports rendered bytes out of the process. `write` is synchronous
/// and may block for I/O completion.
pub trait Sink: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Discards everything.
pub struct VoidSink;

impl Sink for VoidSink {
    fn write(&mut self, _bytes: &[u8]) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(feature = "std")]
mod host {
    use super::{Sink, SinkError};
    use std::io::Write;

    /// Adapts any `io::Write` into a sink.
    pub struct WriteSink<W> {
        inner: W,
    }

    impl<W: Write + Send> WriteSink<W> {
        pub fn new(inner: W) -> Self {
            Self { inner }
        }

        pub fn into_inner(self) -> W {
            self.inner
        }
    }

    impl<W: Write + Send> Sink for WriteSink<W> {
        fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
            self.inner.write_all(bytes).map_err(|_| SinkError)
        }

        fn flush(&mut self) -> Result<(), SinkError> {
            self.inner.flush().map_err(|_| SinkError)
        }
    }
}

#[cfg(feature = "std")]
pub use host::WriteSink;

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn write_sink_collects_bytes() {
        let mut sink = WriteSink::new(Vec::new());
        sink.write(b"abc").unwrap();
        sink.write(b"def").unwrap();
        assert_eq!(sink.into_inner(), b"abcdef");
    }

    #[test]
    fn void_sink_accepts_anything() {
        assert_eq!(VoidSink.write(b"dropped"), Ok(()));
    }
}
