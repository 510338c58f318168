//! Route handler responses.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// What a route handler hands back to the transport.
#[derive(Debug)]
pub enum Response {
    /// Complete body, e.g. a rendered page
    Bytes(Vec<u8>),
    /// Streamed file body plus metadata headers
    Stream(FileStream),
}

impl Response {
    /// Drain the response into memory.
    pub fn into_bytes(self) -> io::Result<Vec<u8>> {
        match self {
            Self::Bytes(body) => Ok(body),
            Self::Stream(mut stream) => {
                let mut body = Vec::with_capacity(stream.size as usize);
                stream.read_to_end(&mut body)?;
                Ok(body)
            }
        }
    }
}

/// Open file handle served without buffering it whole.
#[derive(Debug)]
pub struct FileStream {
    file: File,
    /// Size in bytes at open time
    pub size: u64,
    /// `name` carries the download file name
    pub headers: BTreeMap<String, Vec<u8>>,
}

impl FileStream {
    /// Open `path` for streaming, naming the download after the file.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();

        let mut headers = BTreeMap::new();
        if let Some(name) = path.file_name() {
            headers.insert("name".to_owned(), name.to_string_lossy().into_owned().into_bytes());
        }
        Ok(Self {
            file,
            size,
            headers,
        })
    }

    /// Download file name from the `name` header.
    pub fn name(&self) -> Option<String> {
        self.headers
            .get("name")
            .map(|name| String::from_utf8_lossy(name).into_owned())
    }
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}
