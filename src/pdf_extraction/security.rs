// Standard security handler: password checks and object decryption (RC4, AES-128, AES-256)
use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use lopdf::{Dictionary, Document, Object, ObjectId};
use md5::Md5;
use sha2::{Digest, Sha256, Sha384, Sha512};
use tracing::debug;

use super::lopdf_helper::resolve;
use crate::types::{CamsError, Result};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Password padding string (PDF 32000-1, 7.6.3.3).
pub(crate) const PASSWORD_PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// How strings or streams of one document are encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cipher {
    Identity,
    Rc4,
    AesV2,
    AesV3,
}

impl Cipher {
    /// Plaintext of `data` stored in object `id`; `None` leaves the bytes as they are.
    fn decrypt(self, file_key: &[u8], id: ObjectId, data: &[u8]) -> Option<Vec<u8>> {
        match self {
            Cipher::Identity => None,
            Cipher::Rc4 => {
                let mut plain = data.to_vec();
                rc4(&object_key(file_key, id, false), &mut plain);
                Some(plain)
            }
            Cipher::AesV2 => aes_cbc_decrypt(&object_key(file_key, id, true), data),
            Cipher::AesV3 => aes_cbc_decrypt(file_key, data),
        }
    }
}

/// The `/Encrypt` dictionary of a document using the standard security handler.
#[derive(Debug, Clone)]
pub struct SecurityHandler {
    version: i64,
    revision: i64,
    /// File key length in bytes.
    key_length: usize,
    owner_entry: Vec<u8>,
    user_entry: Vec<u8>,
    owner_key_entry: Vec<u8>,
    user_key_entry: Vec<u8>,
    permissions: i32,
    file_id: Vec<u8>,
    encrypt_metadata: bool,
    strings: Cipher,
    streams: Cipher,
}

impl SecurityHandler {
    /// Read the document's encryption dictionary; `None` when it is not encrypted.
    pub fn from_document(document: &Document) -> Result<Option<Self>> {
        let Ok(entry) = document.trailer.get(b"Encrypt") else {
            return Ok(None);
        };
        let dict = match resolve(document, entry) {
            Some(Object::Dictionary(dict)) => dict,
            _ => return Err(CamsError::CorruptDocument("unreadable encryption dictionary".into())),
        };

        match name(dict, b"Filter") {
            Some(b"Standard") => {}
            Some(other) => {
                return Err(CamsError::UnsupportedEncryption(format!(
                    "{} security handler",
                    String::from_utf8_lossy(other)
                )))
            }
            None => return Err(CamsError::CorruptDocument("encryption dictionary has no /Filter".into())),
        }

        let version = integer(dict, b"V").unwrap_or(0);
        let revision = integer(dict, b"R")
            .ok_or_else(|| CamsError::CorruptDocument("encryption dictionary has no /R".into()))?;
        let unsupported = || CamsError::UnsupportedEncryption(format!("standard handler V{version} R{revision}"));

        let (strings, streams, key_length) = match (version, revision) {
            (1, 2..=3) => (Cipher::Rc4, Cipher::Rc4, 5),
            (2, 2..=3) => {
                let bits = integer(dict, b"Length").unwrap_or(40);
                (Cipher::Rc4, Cipher::Rc4, (bits / 8).clamp(5, 16) as usize)
            }
            (4, 4) | (5, 5..=6) => {
                let (strings, string_length) = crypt_filter(document, dict, b"StrF", version)?;
                let (streams, stream_length) = crypt_filter(document, dict, b"StmF", version)?;
                let key_length = if version == 5 {
                    32
                } else {
                    string_length.or(stream_length).unwrap_or(16)
                };
                (strings, streams, key_length)
            }
            _ => return Err(unsupported()),
        };

        let owner_entry = string(dict, b"O").ok_or_else(|| CamsError::CorruptDocument("missing /O entry".into()))?;
        let user_entry = string(dict, b"U").ok_or_else(|| CamsError::CorruptDocument("missing /U entry".into()))?;
        let (owner_key_entry, user_key_entry) = if version == 5 {
            match (string(dict, b"OE"), string(dict, b"UE")) {
                (Some(oe), Some(ue)) if owner_entry.len() >= 48 && user_entry.len() >= 48 => (oe, ue),
                _ => return Err(CamsError::CorruptDocument("incomplete AES-256 encryption dictionary".into())),
            }
        } else {
            (Vec::new(), Vec::new())
        };

        let file_id = match document.trailer.get(b"ID") {
            Ok(Object::Array(ids)) => match ids.first() {
                Some(Object::String(id, _)) => id.clone(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };

        debug!(version, revision, key_length, ?strings, ?streams, "standard security handler");
        Ok(Some(Self {
            version,
            revision,
            key_length,
            owner_entry,
            user_entry,
            owner_key_entry,
            user_key_entry,
            permissions: integer(dict, b"P").unwrap_or(-1) as i32,
            file_id,
            encrypt_metadata: !matches!(dict.get(b"EncryptMetadata"), Ok(Object::Boolean(false))),
            strings,
            streams,
        }))
    }

    /// The file key, when `password` is the user password.
    pub fn user_key(&self, password: &[u8]) -> Option<Vec<u8>> {
        if self.revision >= 5 {
            let password = &password[..password.len().min(127)];
            let (hash, validation, key_salt) = split_entry(&self.user_entry);
            if self.hash(password, validation, &[]) != hash {
                return None;
            }
            let intermediate = self.hash(password, key_salt, &[]);
            return aes256_unwrap(&intermediate, &self.user_key_entry);
        }

        let key = self.rc4_file_key(password);
        let matches = if self.revision == 2 {
            let mut check = PASSWORD_PADDING;
            rc4(&key, &mut check);
            self.user_entry.get(..32) == Some(&check[..])
        } else {
            let mut check: [u8; 16] = Md5::new()
                .chain_update(PASSWORD_PADDING)
                .chain_update(&self.file_id)
                .finalize()
                .into();
            rc4_rounds(&key, &mut check, 0..=19);
            self.user_entry.get(..16) == Some(&check[..])
        };
        matches.then_some(key)
    }

    /// The file key, when `password` is the owner password.
    pub fn owner_key(&self, password: &[u8]) -> Option<Vec<u8>> {
        if self.revision >= 5 {
            let password = &password[..password.len().min(127)];
            let user_data = self.user_entry.get(..48)?;
            let (hash, validation, key_salt) = split_entry(&self.owner_entry);
            if self.hash(password, validation, user_data) != hash {
                return None;
            }
            let intermediate = self.hash(password, key_salt, user_data);
            return aes256_unwrap(&intermediate, &self.owner_key_entry);
        }

        let mut digest: [u8; 16] = Md5::digest(pad_password(password)).into();
        if self.revision >= 3 {
            for _ in 0..50 {
                digest = Md5::digest(digest).into();
            }
        }
        let key = &digest[..self.rc4_key_length()];

        let mut user_password = self.owner_entry.get(..32)?.to_vec();
        if self.revision == 2 {
            rc4(key, &mut user_password);
        } else {
            rc4_rounds(key, &mut user_password, (0..=19).rev());
        }
        self.user_key(&user_password)
    }

    /// Decrypt every string and stream of `document` in place and drop `/Encrypt`.
    pub fn decrypt_document(&self, document: &mut Document, file_key: &[u8]) {
        let encrypt_id = match document.trailer.get(b"Encrypt") {
            Ok(Object::Reference(id)) => Some(*id),
            _ => None,
        };
        let mut skipped = 0usize;
        for (id, object) in document.objects.iter_mut() {
            if Some(*id) == encrypt_id {
                continue;
            }
            self.decrypt_object(file_key, *id, object, &mut skipped);
        }
        if skipped > 0 {
            debug!(skipped, "left undecryptable strings or streams as stored");
        }
        if let Some(id) = encrypt_id {
            document.objects.remove(&id);
        }
        document.trailer.remove(b"Encrypt");
    }

    fn decrypt_object(&self, file_key: &[u8], id: ObjectId, object: &mut Object, skipped: &mut usize) {
        match object {
            Object::String(bytes, _) => {
                if self.strings == Cipher::Identity {
                    return;
                }
                match self.strings.decrypt(file_key, id, bytes) {
                    Some(plain) => *bytes = plain,
                    None => *skipped += 1,
                }
            }
            Object::Array(items) => {
                for item in items.iter_mut() {
                    self.decrypt_object(file_key, id, item, skipped);
                }
            }
            Object::Dictionary(dict) => self.decrypt_dictionary(file_key, id, dict, skipped),
            Object::Stream(stream) => {
                if has_type(&stream.dict, b"XRef") {
                    return;
                }
                self.decrypt_dictionary(file_key, id, &mut stream.dict, skipped);
                if self.streams == Cipher::Identity || (!self.encrypt_metadata && has_type(&stream.dict, b"Metadata")) {
                    return;
                }
                match self.streams.decrypt(file_key, id, &stream.content) {
                    Some(plain) => stream.set_content(plain),
                    None => *skipped += 1,
                }
            }
            _ => {}
        }
    }

    fn decrypt_dictionary(&self, file_key: &[u8], id: ObjectId, dict: &mut Dictionary, skipped: &mut usize) {
        let keys: Vec<Vec<u8>> = dict.iter().map(|(key, _)| key.clone()).collect();
        for key in keys {
            if let Ok(value) = dict.get_mut(&key) {
                self.decrypt_object(file_key, id, value, skipped);
            }
        }
    }

    fn rc4_key_length(&self) -> usize {
        if self.revision == 2 {
            5
        } else {
            self.key_length
        }
    }

    /// File key from a password (algorithm 2, revisions 2 to 4).
    fn rc4_file_key(&self, password: &[u8]) -> Vec<u8> {
        let length = self.rc4_key_length();
        let mut hasher = Md5::new()
            .chain_update(pad_password(password))
            .chain_update(&self.owner_entry[..self.owner_entry.len().min(32)])
            .chain_update(self.permissions.to_le_bytes())
            .chain_update(&self.file_id);
        if self.revision >= 4 && !self.encrypt_metadata {
            hasher.update([0xFF; 4]);
        }
        let mut digest: [u8; 16] = hasher.finalize().into();
        if self.revision >= 3 {
            for _ in 0..50 {
                digest = Md5::digest(&digest[..length]).into();
            }
        }
        digest[..length].to_vec()
    }

    /// Password hash of the AES-256 handlers (SHA-256 for revision 5, the
    /// iterated SHA-2 hash for revision 6).
    fn hash(&self, password: &[u8], salt: &[u8], user_data: &[u8]) -> Vec<u8> {
        let mut k = Sha256::new()
            .chain_update(password)
            .chain_update(salt)
            .chain_update(user_data)
            .finalize()
            .to_vec();
        if self.revision == 5 {
            return k;
        }

        let mut round = 0usize;
        loop {
            let mut block = Vec::with_capacity(password.len() + k.len() + user_data.len());
            block.extend_from_slice(password);
            block.extend_from_slice(&k);
            block.extend_from_slice(user_data);
            let mut k1 = block.repeat(64);

            let len = k1.len();
            let Ok(cipher) = Aes128CbcEnc::new_from_slices(&k[..16], &k[16..32]) else {
                break;
            };
            let Ok(e) = cipher.encrypt_padded_mut::<NoPadding>(&mut k1, len) else {
                break;
            };
            let selector = e[..16].iter().map(|b| u32::from(*b)).sum::<u32>() % 3;
            k = match selector {
                0 => Sha256::digest(&*e).to_vec(),
                1 => Sha384::digest(&*e).to_vec(),
                _ => Sha512::digest(&*e).to_vec(),
            };
            let last = usize::from(e[e.len() - 1]);

            round += 1;
            if round >= 64 && last + 32 <= round {
                break;
            }
        }
        k.truncate(32);
        k
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn revision(&self) -> i64 {
        self.revision
    }
}

/// `/StrF` or `/StmF` of a V4/V5 dictionary, with the filter's key length in bytes.
fn crypt_filter(document: &Document, dict: &Dictionary, key: &[u8], version: i64) -> Result<(Cipher, Option<usize>)> {
    let filter = name(dict, key).unwrap_or(b"Identity");
    if filter == b"Identity" {
        return Ok((Cipher::Identity, None));
    }
    let described = dict
        .get(b"CF")
        .ok()
        .and_then(|cf| resolve(document, cf))
        .and_then(|cf| match cf {
            Object::Dictionary(cf) => cf.get(filter).ok(),
            _ => None,
        })
        .and_then(|entry| resolve(document, entry));
    let Some(Object::Dictionary(described)) = described else {
        return Err(CamsError::CorruptDocument(format!(
            "crypt filter {} is not described",
            String::from_utf8_lossy(filter)
        )));
    };

    // Some writers give the length in bits.
    let length = integer(described, b"Length").map(|l| {
        let bytes = if l > 32 { l / 8 } else { l };
        bytes.clamp(5, 32) as usize
    });
    let cipher = match (name(described, b"CFM").unwrap_or(b"None"), version) {
        (b"V2", 4) => Cipher::Rc4,
        (b"AESV2", 4) => Cipher::AesV2,
        (b"AESV3", 5) => Cipher::AesV3,
        (method, _) => {
            return Err(CamsError::UnsupportedEncryption(format!(
                "crypt filter method {}",
                String::from_utf8_lossy(method)
            )))
        }
    };
    let length = match cipher {
        Cipher::AesV2 => Some(16),
        Cipher::Rc4 => length.map(|l| l.min(16)),
        _ => length,
    };
    Ok((cipher, length))
}

fn name<'a>(dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    match dict.get(key).ok()? {
        Object::Name(name) => Some(name),
        _ => None,
    }
}

fn integer(dict: &Dictionary, key: &[u8]) -> Option<i64> {
    match dict.get(key).ok()? {
        Object::Integer(value) => Some(*value),
        _ => None,
    }
}

fn string(dict: &Dictionary, key: &[u8]) -> Option<Vec<u8>> {
    match dict.get(key).ok()? {
        Object::String(bytes, _) => Some(bytes.clone()),
        _ => None,
    }
}

fn has_type(dict: &Dictionary, expected: &[u8]) -> bool {
    name(dict, b"Type") == Some(expected)
}

/// Hash, validation salt and key salt of a 48-byte `/U` or `/O` entry.
fn split_entry(entry: &[u8]) -> (&[u8], &[u8], &[u8]) {
    let entry = &entry[..entry.len().min(48)];
    let (hash, salts) = entry.split_at(entry.len().min(32));
    let (validation, key_salt) = salts.split_at(salts.len().min(8));
    (hash, validation, key_salt)
}

/// Per-object key for RC4 and AES-128 (algorithm 1).
fn object_key(file_key: &[u8], (number, generation): ObjectId, aes: bool) -> Vec<u8> {
    let mut hasher = Md5::new()
        .chain_update(file_key)
        .chain_update(&number.to_le_bytes()[..3])
        .chain_update(&generation.to_le_bytes()[..2]);
    if aes {
        hasher.update(b"sAlT");
    }
    let digest = hasher.finalize();
    digest[..(file_key.len() + 5).min(16)].to_vec()
}

/// Decrypt `IV || ciphertext` with PKCS#7 padding.
fn aes_cbc_decrypt(key: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    if data.len() < 16 {
        return None;
    }
    let (iv, body) = data.split_at(16);
    if body.is_empty() {
        return Some(Vec::new());
    }
    if body.len() % 16 != 0 {
        return None;
    }
    let mut buffer = body.to_vec();
    let plain = match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, iv)
            .ok()?
            .decrypt_padded_mut::<Pkcs7>(&mut buffer)
            .ok()?,
        32 => Aes256CbcDec::new_from_slices(key, iv)
            .ok()?
            .decrypt_padded_mut::<Pkcs7>(&mut buffer)
            .ok()?,
        _ => return None,
    };
    Some(plain.to_vec())
}

/// Recover the file key from `/UE` or `/OE` (AES-256, zero IV, no padding).
fn aes256_unwrap(key: &[u8], wrapped: &[u8]) -> Option<Vec<u8>> {
    let mut buffer = wrapped.get(..32)?.to_vec();
    let plain = Aes256CbcDec::new_from_slices(key, &[0u8; 16])
        .ok()?
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .ok()?;
    Some(plain.to_vec())
}

pub(crate) fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = PASSWORD_PADDING;
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PASSWORD_PADDING[..32 - len]);
    padded
}

/// RC4 with `key ^ round` for each round, as revisions 3 and 4 iterate it.
fn rc4_rounds(key: &[u8], data: &mut [u8], rounds: impl Iterator<Item = u8>) {
    for round in rounds {
        let round_key: Vec<u8> = key.iter().map(|b| b ^ round).collect();
        rc4(&round_key, data);
    }
}

/// RC4 keystream applied in place.
pub(crate) fn rc4(key: &[u8], data: &mut [u8]) {
    let mut state: [u8; 256] = std::array::from_fn(|i| i as u8);
    let mut j: u8 = 0;
    for i in 0..256 {
        j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
        state.swap(i, j as usize);
    }
    let (mut i, mut j) = (0u8, 0u8);
    for byte in data.iter_mut() {
        i = i.wrapping_add(1);
        j = j.wrapping_add(state[i as usize]);
        state.swap(i as usize, j as usize);
        let k = state[(state[i as usize].wrapping_add(state[j as usize])) as usize];
        *byte ^= k;
    }
}
