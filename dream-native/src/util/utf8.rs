/// Collects raw token bytes and hands back only complete UTF-8 text.
///
/// llama.cpp pieces can end in the middle of a multi-byte character (accents
/// and emoji are common in the assistant's Spanish replies), so pieces are
/// buffered until they form valid text.
#[derive(Debug, Default)]
pub struct Utf8EmitBuffer {
    buf: Vec<u8>,
}

impl Utf8EmitBuffer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Invalid sequences become U+FFFD right away; only an incomplete
    /// trailing character is held back for the next piece.
    pub fn push_and_take_valid(&mut self, bytes: &[u8]) -> String {
        // NULs break C strings and Java's modified UTF-8.
        self.buf.extend(bytes.iter().copied().filter(|b| *b != 0));

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.buf) {
                Ok(s) => {
                    out.push_str(s);
                    self.buf.clear();
                    return out;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.buf[..valid_up_to]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.buf.drain(..valid_up_to + bad);
                        }
                        None => {
                            self.buf.drain(..valid_up_to);
                            return out;
                        }
                    }
                }
            }
        }
    }

    pub fn flush_lossy(&mut self) -> String {
        if self.buf.is_empty() {
            return String::new();
        }
        let s = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        s
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
