//! Layout contract of the precompiled handler images.

use thiserror::Error;

/// Size of the entry-word header preceding the relocatable body.
pub const BLOB_HEADER_SIZE: usize = 32;

/// A build-time handler image: a 32-byte header of entry words over a
/// relocatable machine-code body.
///
/// The machine code itself is opaque; only its layout is contractual. Words
/// at header byte offsets 4, 8, 12 and 16 are the four entry words, and
/// bytes `[32, len)` are the body the installers copy into place. The body
/// carries the sentinel words the ARM11 patcher rewrites (see
/// [`patch_arm11_page`]).
///
/// [`patch_arm11_page`]: crate::install::patch_arm11_page
#[derive(Debug, Clone, Copy)]
pub struct HandlerBlob<'a> {
    data: &'a [u8],
}

/// A handler image that does not satisfy the layout contract.
#[derive(Error, Debug)]
pub enum BlobError {
    /// Shorter than the mandatory entry-word header.
    #[error("handler image of {len} bytes is shorter than the {BLOB_HEADER_SIZE}-byte header")]
    TooShort { len: usize },
    /// The relocatable body must be a whole number of instruction words.
    #[error("handler image body of {len} bytes is not 32-bit aligned")]
    UnalignedBody { len: usize },
}

impl<'a> HandlerBlob<'a> {
    /// Check the layout contract of `data` and wrap it.
    pub fn parse(data: &'a [u8]) -> Result<Self, BlobError> {
        if data.len() < BLOB_HEADER_SIZE {
            return Err(BlobError::TooShort { len: data.len() });
        }
        let body_len = data.len() - BLOB_HEADER_SIZE;
        if body_len % 4 != 0 {
            return Err(BlobError::UnalignedBody { len: body_len });
        }
        Ok(HandlerBlob { data })
    }

    /// Whole image length in bytes, header included.
    pub fn total_len(&self) -> usize {
        self.data.len()
    }

    /// The relocatable body, bytes `[32, len)` of the image.
    pub fn body(&self) -> &'a [u8] {
        &self.data[BLOB_HEADER_SIZE..]
    }

    /// Body length in bytes.
    pub fn body_len(&self) -> usize {
        self.data.len() - BLOB_HEADER_SIZE
    }

    /// The body as little-endian instruction words.
    pub fn body_words(&self) -> impl Iterator<Item = u32> + 'a {
        self.body()
            .chunks_exact(4)
            .map(|bytes| u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Entry word `index` (0..4) from the header, at byte offset `4 + 4 * index`.
    ///
    /// For the ARM11 image these are handler entry offsets relative to the
    /// start of the body, in the order FIQ, undefined instruction, prefetch
    /// abort. For the ARM9 image they are pre-encoded literal-pool words, one
    /// per patched hardware vector.
    pub fn entry_word(&self, index: usize) -> u32 {
        assert!(index < 4);
        let offset = 4 + 4 * index;
        u32::from_le_bytes(self.data[offset..offset + 4].try_into().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(entries: [u32; 4], body: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; 4];
        for entry in entries {
            data.extend_from_slice(&entry.to_le_bytes());
        }
        data.resize(BLOB_HEADER_SIZE, 0);
        data.extend_from_slice(body);
        data
    }

    #[test]
    fn parse_rejects_short_images() {
        assert!(matches!(
            HandlerBlob::parse(&[0u8; 31]),
            Err(BlobError::TooShort { len: 31 })
        ));
    }

    #[test]
    fn parse_rejects_unaligned_bodies() {
        assert!(matches!(
            HandlerBlob::parse(&[0u8; 34]),
            Err(BlobError::UnalignedBody { len: 2 })
        ));
    }

    #[test]
    fn entry_words_and_body() {
        let data = image([0x40, 0x50, 0x60, 0x70], &[1, 0, 0, 0, 2, 0, 0, 0]);
        let blob = HandlerBlob::parse(&data).unwrap();

        assert_eq!(0x40, blob.entry_word(0));
        assert_eq!(0x70, blob.entry_word(3));
        assert_eq!(8, blob.body_len());
        assert_eq!(vec![1, 2], blob.body_words().collect::<Vec<_>>());
    }
}
