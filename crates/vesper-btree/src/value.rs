//! In-node value representation: a fixed-layout header plus either the
//! payload bytes inline or a reference to an out-of-line large buffer.

use vesper_types::value::{
    FLAG_HAS_CAS, FLAG_LARGE, MAX_BTREE_VALUE_SIZE, MAX_IN_NODE_VALUE_SIZE, VALUE_CAS_LEN,
    VALUE_HDR_BASE_LEN,
};
use vesper_types::{Cas, LargeBufRef, Result, VesperError, LARGE_BUF_REF_LEN};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ValueMeta {
    pub client_flags: u32,
    pub expiration: u32,
    /// CAS slot. `Some` means the slot is reserved; the driver writes the
    /// authoritative token before committing.
    pub cas: Option<Cas>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Payload {
    Inline(Vec<u8>),
    Large(LargeBufRef),
}

/// One key's stored value. Built fresh by a modify operation and never
/// mutated after it is handed to the driver (except for the driver's own
/// CAS assignment).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Value {
    meta: ValueMeta,
    payload: Payload,
}

impl Value {
    pub fn new_inline(meta: ValueMeta, bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() > MAX_IN_NODE_VALUE_SIZE as usize {
            return Err(VesperError::Invalid("inline payload exceeds in-node limit"));
        }
        Ok(Self {
            meta,
            payload: Payload::Inline(bytes),
        })
    }

    pub fn new_large(meta: ValueMeta, vref: LargeBufRef) -> Result<Self> {
        if vref.len <= MAX_IN_NODE_VALUE_SIZE {
            return Err(VesperError::Invalid("large buffer below in-node limit"));
        }
        Ok(Self {
            meta,
            payload: Payload::Large(vref),
        })
    }

    pub fn meta(&self) -> &ValueMeta {
        &self.meta
    }

    pub fn size(&self) -> u32 {
        match &self.payload {
            Payload::Inline(bytes) => bytes.len() as u32,
            Payload::Large(vref) => vref.len,
        }
    }

    pub fn is_large(&self) -> bool {
        matches!(self.payload, Payload::Large(_))
    }

    pub fn has_cas(&self) -> bool {
        self.meta.cas.is_some()
    }

    pub fn cas(&self) -> Option<Cas> {
        self.meta.cas
    }

    /// Driver-side CAS assignment; refuses when no slot was reserved.
    pub fn set_cas(&mut self, cas: Cas) -> Result<()> {
        match &mut self.meta.cas {
            Some(slot) => {
                *slot = cas;
                Ok(())
            }
            None => Err(VesperError::Invalid("value has no cas slot")),
        }
    }

    pub fn inline(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Inline(bytes) => Some(bytes),
            Payload::Large(_) => None,
        }
    }

    pub fn large_ref(&self) -> Option<&LargeBufRef> {
        match &self.payload {
            Payload::Inline(_) => None,
            Payload::Large(vref) => Some(vref),
        }
    }

    pub fn encoded_len(&self) -> usize {
        let mut len = VALUE_HDR_BASE_LEN;
        if self.meta.cas.is_some() {
            len += VALUE_CAS_LEN;
        }
        len + match &self.payload {
            Payload::Inline(bytes) => bytes.len(),
            Payload::Large(_) => LARGE_BUF_REF_LEN,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.encoded_len() > MAX_BTREE_VALUE_SIZE {
            return Err(VesperError::Invalid("value exceeds node footprint"));
        }
        let mut flags = 0u8;
        if self.is_large() {
            flags |= FLAG_LARGE;
        }
        if self.meta.cas.is_some() {
            flags |= FLAG_HAS_CAS;
        }
        out.push(flags);
        out.extend_from_slice(&self.meta.client_flags.to_be_bytes());
        out.extend_from_slice(&self.meta.expiration.to_be_bytes());
        if let Some(cas) = self.meta.cas {
            out.extend_from_slice(&cas.0.to_be_bytes());
        }
        out.extend_from_slice(&self.size().to_be_bytes());
        match &self.payload {
            Payload::Inline(bytes) => out.extend_from_slice(bytes),
            Payload::Large(vref) => {
                let mut buf = [0u8; LARGE_BUF_REF_LEN];
                vref.encode(&mut buf)?;
                out.extend_from_slice(&buf);
            }
        }
        Ok(())
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < VALUE_HDR_BASE_LEN {
            return Err(VesperError::Corruption("value header truncated"));
        }
        let flags = src[0];
        if flags & !(FLAG_LARGE | FLAG_HAS_CAS) != 0 {
            return Err(VesperError::Corruption("unknown value flags"));
        }
        let mut at = 1usize;
        let client_flags = u32::from_be_bytes(src[at..at + 4].try_into().unwrap());
        at += 4;
        let expiration = u32::from_be_bytes(src[at..at + 4].try_into().unwrap());
        at += 4;
        let cas = if flags & FLAG_HAS_CAS != 0 {
            if src.len() < at + VALUE_CAS_LEN + 4 {
                return Err(VesperError::Corruption("value header truncated"));
            }
            let cas = Cas(u64::from_be_bytes(src[at..at + 8].try_into().unwrap()));
            at += 8;
            Some(cas)
        } else {
            None
        };
        let size = u32::from_be_bytes(src[at..at + 4].try_into().unwrap());
        at += 4;
        let meta = ValueMeta {
            client_flags,
            expiration,
            cas,
        };
        let body = &src[at..];
        if flags & FLAG_LARGE != 0 {
            if size <= MAX_IN_NODE_VALUE_SIZE {
                return Err(VesperError::Corruption("large flag on in-node sized value"));
            }
            if body.len() != LARGE_BUF_REF_LEN {
                return Err(VesperError::Corruption("value length mismatch"));
            }
            let vref = LargeBufRef::decode(body)?;
            if vref.len != size {
                return Err(VesperError::Corruption(
                    "size disagrees with large buffer reference",
                ));
            }
            Ok(Self {
                meta,
                payload: Payload::Large(vref),
            })
        } else {
            if size > MAX_IN_NODE_VALUE_SIZE {
                return Err(VesperError::Corruption("inline size above in-node limit"));
            }
            if body.len() != size as usize {
                return Err(VesperError::Corruption("value length mismatch"));
            }
            Ok(Self {
                meta,
                payload: Payload::Inline(body.to_vec()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Value, ValueMeta};
    use vesper_types::value::MAX_IN_NODE_VALUE_SIZE;
    use vesper_types::{Cas, LargeBufRef, PageId};

    fn meta(cas: Option<Cas>) -> ValueMeta {
        ValueMeta {
            client_flags: 0xF00D,
            expiration: 3600,
            cas,
        }
    }

    fn large_ref(len: u32) -> LargeBufRef {
        LargeBufRef {
            start_page: PageId(12),
            n_pages: 4,
            len,
            head_offset: 33,
        }
    }

    #[test]
    fn inline_roundtrip_without_cas() {
        let value = Value::new_inline(meta(None), b"hello".to_vec()).unwrap();
        let mut buf = Vec::new();
        value.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), value.encoded_len());
        let decoded = Value::decode(&buf).unwrap();
        assert_eq!(decoded, value);
        assert!(!decoded.is_large());
        assert_eq!(decoded.size(), 5);
    }

    #[test]
    fn inline_roundtrip_with_cas() {
        let value = Value::new_inline(meta(Some(Cas(77))), b"x".to_vec()).unwrap();
        let mut buf = Vec::new();
        value.encode(&mut buf).unwrap();
        let decoded = Value::decode(&buf).unwrap();
        assert_eq!(decoded.cas(), Some(Cas(77)));
        assert_eq!(decoded, value);
    }

    #[test]
    fn large_roundtrip() {
        let value = Value::new_large(meta(Some(Cas::PENDING)), large_ref(1_000)).unwrap();
        let mut buf = Vec::new();
        value.encode(&mut buf).unwrap();
        let decoded = Value::decode(&buf).unwrap();
        assert_eq!(decoded, value);
        assert!(decoded.is_large());
        assert_eq!(decoded.size(), 1_000);
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let value = Value::new_inline(meta(None), b"abc".to_vec()).unwrap();
        let mut buf = Vec::new();
        value.encode(&mut buf).unwrap();
        buf.push(0);
        assert!(Value::decode(&buf).is_err());
    }

    #[test]
    fn decode_rejects_unknown_flags() {
        let value = Value::new_inline(meta(None), b"abc".to_vec()).unwrap();
        let mut buf = Vec::new();
        value.encode(&mut buf).unwrap();
        buf[0] |= 0x80;
        assert!(Value::decode(&buf).is_err());
    }

    #[test]
    fn decode_rejects_ref_size_disagreement() {
        let value = Value::new_large(meta(None), large_ref(1_000)).unwrap();
        let mut buf = Vec::new();
        value.encode(&mut buf).unwrap();
        // Size field sits right before the reference.
        let size_at = 1 + 4 + 4;
        buf[size_at..size_at + 4].copy_from_slice(&999u32.to_be_bytes());
        assert!(Value::decode(&buf).is_err());
    }

    #[test]
    fn size_classes_are_enforced() {
        let too_big = vec![0u8; MAX_IN_NODE_VALUE_SIZE as usize + 1];
        assert!(Value::new_inline(meta(None), too_big).is_err());
        assert!(Value::new_large(meta(None), large_ref(MAX_IN_NODE_VALUE_SIZE)).is_err());
    }

    #[test]
    fn cas_assignment_requires_slot() {
        let mut without = Value::new_inline(meta(None), Vec::new()).unwrap();
        assert!(without.set_cas(Cas(1)).is_err());
        let mut with = Value::new_inline(meta(Some(Cas::PENDING)), Vec::new()).unwrap();
        with.set_cas(Cas(42)).unwrap();
        assert_eq!(with.cas(), Some(Cas(42)));
    }
}
