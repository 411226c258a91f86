use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::dns::resource::Record;

/// A record set together with the single RRSIG covering it.
///
/// Every record in the set shares name, class, type and TTL; the RRSIG's
/// TypeCovered equals that type. Only the signing task constructs these.
#[derive(Clone, Debug)]
pub struct SignedAnswer {
    pub records: Vec<Record>,
    pub rrsig: Record,
}

/// Per-type table of the most recent signed answers.
///
/// One slot per 16-bit type code plus a dedicated SOA slot (the SOA is
/// regenerated on every signing pass and would otherwise churn the table).
/// Slots are replaced by atomic pointer swap, so readers see either the old
/// or the new answer in full.
pub struct RecordStore {
    slots: Box<[ArcSwapOption<SignedAnswer>]>,
    soa: ArcSwapOption<SignedAnswer>,
}

impl RecordStore {
    pub fn new() -> Self {
        let slots: Vec<ArcSwapOption<SignedAnswer>> = (0..=u16::MAX as usize)
            .map(|_| ArcSwapOption::empty())
            .collect();
        RecordStore {
            slots: slots.into_boxed_slice(),
            soa: ArcSwapOption::empty(),
        }
    }

    pub fn get(&self, type_code: u16) -> Option<Arc<SignedAnswer>> {
        if type_code == crate::dns::enums::RecordType::SOA.code() {
            return self.soa.load_full();
        }
        self.slots[type_code as usize].load_full()
    }

    pub fn store(&self, type_code: u16, answer: SignedAnswer) {
        self.slots[type_code as usize].store(Some(Arc::new(answer)));
    }

    pub fn store_soa(&self, answer: SignedAnswer) {
        self.soa.store(Some(Arc::new(answer)));
    }

    pub fn is_occupied(&self, type_code: u16) -> bool {
        self.slots[type_code as usize].load().is_some()
    }

    /// Occupied type codes in ascending order. The SOA slot is not listed;
    /// callers that need it account for it themselves.
    pub fn occupied_types(&self) -> Vec<u16> {
        (0..=u16::MAX)
            .filter(|&code| self.slots[code as usize].load().is_some())
            .collect()
    }

    /// AXFR ordering (RFC 5936 §2.2): SOA, every occupied slot by type
    /// code, SOA again.
    pub fn transfer(&self) -> Vec<Arc<SignedAnswer>> {
        let Some(soa) = self.soa.load_full() else {
            return Vec::new();
        };

        let mut result = vec![soa.clone()];
        for code in 0..=u16::MAX {
            if let Some(answer) = self.slots[code as usize].load_full() {
                result.push(answer);
            }
        }
        result.push(soa);
        result
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::enums::{RecordClass, RecordType};
    use crate::dns::name::Name;

    fn answer(rtype: RecordType) -> SignedAnswer {
        let owner = Name::canonical("z.example.");
        SignedAnswer {
            records: vec![Record::new(owner.clone(), rtype, RecordClass::IN, 300)],
            rrsig: Record::new(owner, RecordType::RRSIG, RecordClass::IN, 300),
        }
    }

    #[test]
    fn test_store_and_get() {
        let store = RecordStore::new();
        assert!(store.get(16).is_none());

        store.store(16, answer(RecordType::TXT));
        let got = store.get(16).unwrap();
        assert_eq!(got.records[0].rtype, RecordType::TXT);
    }

    #[test]
    fn test_soa_slot_is_separate() {
        let store = RecordStore::new();
        store.store_soa(answer(RecordType::SOA));

        assert!(store.get(RecordType::SOA.code()).is_some());
        assert!(!store.is_occupied(RecordType::SOA.code()));
        assert!(store.occupied_types().is_empty());
    }

    #[test]
    fn test_transfer_ordering() {
        let store = RecordStore::new();
        // no SOA yet: transfer is empty
        store.store(16, answer(RecordType::TXT));
        assert!(store.transfer().is_empty());

        store.store_soa(answer(RecordType::SOA));
        store.store(2, answer(RecordType::NS));

        let transfer = store.transfer();
        assert_eq!(transfer.len(), 4);
        assert_eq!(transfer[0].records[0].rtype, RecordType::SOA);
        assert_eq!(transfer[1].records[0].rtype, RecordType::NS);
        assert_eq!(transfer[2].records[0].rtype, RecordType::TXT);
        assert_eq!(transfer[3].records[0].rtype, RecordType::SOA);
    }

    #[test]
    fn test_occupied_types_sorted() {
        let store = RecordStore::new();
        store.store(48, answer(RecordType::DNSKEY));
        store.store(2, answer(RecordType::NS));
        store.store(16, answer(RecordType::TXT));
        assert_eq!(store.occupied_types(), vec![2, 16, 48]);
    }
}
