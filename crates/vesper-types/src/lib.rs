#![forbid(unsafe_code)]

use std::fmt;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u64);
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Lsn(pub u64);

/// Compare-and-swap version token carried in a value header.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Cas(pub u64);

impl Cas {
    /// Slot-reserved marker. A mutation that must carry a CAS writes this;
    /// the driver overwrites it with the real token before committing.
    pub const PENDING: Cas = Cas(0xCA5A_DDED);
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Cas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to an out-of-line large buffer, stored inside the node value.
///
/// Logical content occupies global offsets `[head_offset, head_offset + len)`
/// of the segment grid rooted at `start_page`; `head_offset` moves when the
/// buffer grows or shrinks at its head.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct LargeBufRef {
    pub start_page: PageId,
    pub n_pages: u32,
    pub len: u32,
    pub head_offset: u16,
}

pub const LARGE_BUF_REF_LEN: usize = 18;

impl LargeBufRef {
    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() < LARGE_BUF_REF_LEN {
            return Err(VesperError::Invalid("large buf ref buffer too small"));
        }
        dst[0..8].copy_from_slice(&self.start_page.0.to_be_bytes());
        dst[8..12].copy_from_slice(&self.n_pages.to_be_bytes());
        dst[12..16].copy_from_slice(&self.len.to_be_bytes());
        dst[16..18].copy_from_slice(&self.head_offset.to_be_bytes());
        Ok(())
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < LARGE_BUF_REF_LEN {
            return Err(VesperError::Corruption("large buf ref truncated"));
        }
        let start_page = PageId(u64::from_be_bytes(src[0..8].try_into().unwrap()));
        let n_pages = u32::from_be_bytes(src[8..12].try_into().unwrap());
        let len = u32::from_be_bytes(src[12..16].try_into().unwrap());
        let head_offset = u16::from_be_bytes(src[16..18].try_into().unwrap());
        if n_pages == 0 {
            return Err(VesperError::Corruption("large buf ref with zero pages"));
        }
        Ok(Self {
            start_page,
            n_pages,
            len,
            head_offset,
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum VesperError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("corruption: {0}")]
    Corruption(&'static str),
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    #[error("not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, VesperError>;

pub mod page {
    //! Shared on-disk page metadata used by pager components.

    use core::convert::{TryFrom, TryInto};

    use super::{PageId, Result, VesperError};

    pub const PAGE_MAGIC: [u8; 4] = *b"VSPR";
    pub const PAGE_FORMAT_VERSION: u16 = 1;
    pub const DEFAULT_PAGE_SIZE: u32 = 8192;
    pub const PAGE_HDR_LEN: usize = 32;

    pub mod header {
        //! Byte offsets for fixed header fields.
        use core::ops::Range;

        pub const MAGIC: Range<usize> = 0..4;
        pub const FORMAT_VERSION: Range<usize> = 4..6;
        pub const PAGE_KIND: usize = 6;
        pub const RESERVED: usize = 7;
        pub const PAGE_SIZE: Range<usize> = 8..12;
        pub const PAGE_NO: Range<usize> = 12..20;
        pub const SALT: Range<usize> = 20..28;
        pub const CRC32: Range<usize> = 28..32;
    }

    #[repr(u8)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub enum PageKind {
        Meta = 1,
        FreeList = 2,
        Leaf = 3,
        Internal = 4,
        Overflow = 5,
    }

    impl PageKind {
        pub const fn as_u8(self) -> u8 {
            self as u8
        }
    }

    impl TryFrom<u8> for PageKind {
        type Error = VesperError;

        fn try_from(value: u8) -> Result<Self> {
            match value {
                1 => Ok(PageKind::Meta),
                2 => Ok(PageKind::FreeList),
                3 => Ok(PageKind::Leaf),
                4 => Ok(PageKind::Internal),
                5 => Ok(PageKind::Overflow),
                _ => Err(VesperError::Corruption("unknown page kind")),
            }
        }
    }

    #[derive(Clone, Debug, Eq, PartialEq)]
    pub struct PageHeader {
        pub kind: PageKind,
        pub page_no: PageId,
        pub page_size: u32,
        pub salt: u64,
        pub crc32: u32,
    }

    impl PageHeader {
        pub fn new(kind: PageKind, page_no: PageId, page_size: u32, salt: u64) -> Result<Self> {
            if (page_size as usize) < PAGE_HDR_LEN {
                return Err(VesperError::Invalid("page size smaller than header"));
            }
            Ok(Self {
                kind,
                page_no,
                page_size,
                salt,
                crc32: 0,
            })
        }

        pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
            if dst.len() < PAGE_HDR_LEN {
                return Err(VesperError::Invalid("page header buffer too small"));
            }
            let hdr = &mut dst[..PAGE_HDR_LEN];
            hdr[header::MAGIC].copy_from_slice(&PAGE_MAGIC);
            hdr[header::FORMAT_VERSION].copy_from_slice(&PAGE_FORMAT_VERSION.to_be_bytes());
            hdr[header::PAGE_KIND] = self.kind.as_u8();
            hdr[header::RESERVED] = 0;
            hdr[header::PAGE_SIZE].copy_from_slice(&self.page_size.to_be_bytes());
            hdr[header::PAGE_NO].copy_from_slice(&self.page_no.0.to_be_bytes());
            hdr[header::SALT].copy_from_slice(&self.salt.to_be_bytes());
            hdr[header::CRC32].copy_from_slice(&self.crc32.to_be_bytes());
            Ok(())
        }

        pub fn decode(src: &[u8]) -> Result<Self> {
            if src.len() < PAGE_HDR_LEN {
                return Err(VesperError::Corruption("page header truncated"));
            }
            let hdr = &src[..PAGE_HDR_LEN];
            let magic: [u8; 4] = hdr[header::MAGIC].try_into().unwrap();
            if magic != PAGE_MAGIC {
                return Err(VesperError::Corruption("invalid page magic"));
            }
            let version = u16::from_be_bytes(hdr[header::FORMAT_VERSION].try_into().unwrap());
            if version != PAGE_FORMAT_VERSION {
                return Err(VesperError::Corruption("unsupported page format version"));
            }
            if hdr[header::RESERVED] != 0 {
                return Err(VesperError::Corruption("page header reserved byte not zero"));
            }
            let kind = PageKind::try_from(hdr[header::PAGE_KIND])?;
            let page_size = u32::from_be_bytes(hdr[header::PAGE_SIZE].try_into().unwrap());
            if (page_size as usize) < PAGE_HDR_LEN {
                return Err(VesperError::Corruption("page size smaller than header"));
            }
            let page_no = PageId(u64::from_be_bytes(hdr[header::PAGE_NO].try_into().unwrap()));
            let salt = u64::from_be_bytes(hdr[header::SALT].try_into().unwrap());
            let crc32 = u32::from_be_bytes(hdr[header::CRC32].try_into().unwrap());
            Ok(Self {
                kind,
                page_no,
                page_size,
                salt,
                crc32,
            })
        }
    }

    pub fn clear_crc32(buf: &mut [u8]) -> Result<()> {
        if buf.len() < header::CRC32.end {
            return Err(VesperError::Invalid("page header buffer too small"));
        }
        buf[header::CRC32].fill(0);
        Ok(())
    }
}

pub mod value {
    //! Size limits and header layout shared by the node value codec.

    /// Largest payload the store accepts at all.
    pub const MAX_VALUE_SIZE: u32 = 1 << 20;
    /// Largest payload kept inline in the tree node; anything bigger moves
    /// to a large buffer.
    pub const MAX_IN_NODE_VALUE_SIZE: u32 = 224;
    /// Upper bound on the encoded in-node footprint of any value
    /// (header + inline bytes, or header + large buffer reference).
    pub const MAX_BTREE_VALUE_SIZE: usize = 256;

    /// Value header flag bits.
    pub const FLAG_LARGE: u8 = 0x01;
    pub const FLAG_HAS_CAS: u8 = 0x02;

    /// Header bytes always present: flags, client flags, expiration, size.
    pub const VALUE_HDR_BASE_LEN: usize = 1 + 4 + 4 + 4;
    /// Extra header bytes when a CAS slot is reserved.
    pub const VALUE_CAS_LEN: usize = 8;
}

#[cfg(test)]
mod tests {
    use super::page::{self, PageHeader, PageKind};
    use super::{value, Cas, LargeBufRef, PageId, LARGE_BUF_REF_LEN};
    use std::convert::TryFrom;

    #[test]
    fn page_header_roundtrip() {
        let mut buf = [0u8; page::PAGE_HDR_LEN];
        let mut header =
            PageHeader::new(PageKind::Overflow, PageId(42), page::DEFAULT_PAGE_SIZE, 777).unwrap();
        header.crc32 = 0xDEADBEEF;
        header.encode(&mut buf).unwrap();
        let decoded = PageHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn page_kind_from_u8_rejects_unknown() {
        assert!(PageKind::try_from(0).is_err());
        assert!(PageKind::try_from(6).is_err());
    }

    #[test]
    fn clear_crc32_zeroes_field() {
        let mut buf = [0xFFu8; page::PAGE_HDR_LEN];
        page::clear_crc32(&mut buf).unwrap();
        assert!(buf[page::header::CRC32].iter().all(|&b| b == 0));
    }

    #[test]
    fn large_buf_ref_roundtrip() {
        let vref = LargeBufRef {
            start_page: PageId(9),
            n_pages: 3,
            len: 1234,
            head_offset: 17,
        };
        let mut buf = [0u8; LARGE_BUF_REF_LEN];
        vref.encode(&mut buf).unwrap();
        assert_eq!(LargeBufRef::decode(&buf).unwrap(), vref);
    }

    #[test]
    fn large_buf_ref_rejects_zero_pages() {
        let buf = [0u8; LARGE_BUF_REF_LEN];
        assert!(LargeBufRef::decode(&buf).is_err());
    }

    #[test]
    fn value_size_constants_are_consistent() {
        assert!(value::MAX_IN_NODE_VALUE_SIZE < value::MAX_VALUE_SIZE);
        let max_header = value::VALUE_HDR_BASE_LEN + value::VALUE_CAS_LEN;
        let max_body = (value::MAX_IN_NODE_VALUE_SIZE as usize).max(LARGE_BUF_REF_LEN);
        assert!(value::MAX_BTREE_VALUE_SIZE >= max_header + max_body);
    }

    #[test]
    fn cas_pending_is_reserved() {
        assert_ne!(Cas::PENDING, Cas(0));
        assert_eq!(Cas::PENDING, Cas(0xCA5A_DDED));
    }
}
