//! Encryption key generation

use crate::utils::ColoredOutput;
use nova_store::EncryptionKey;

pub struct KeygenCommand;

impl KeygenCommand {
    /// The key on stdout, its fingerprint on stderr.
    pub fn run() -> EncryptionKey {
        let key = EncryptionKey::generate();
        println!("{}", key.to_base64());
        eprintln!(
            "{} {}",
            ColoredOutput::dim("fingerprint:"),
            ColoredOutput::highlight(&key.fingerprint())
        );
        key
    }
}
