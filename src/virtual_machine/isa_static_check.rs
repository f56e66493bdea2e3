#[cfg(test)]
mod tests {
    use crate::virtual_machine::isa::Isa;

    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    const EXPECTED_ISA_HASH: u64 = 16897310397743246428;

    fn fnv1a64(mut h: u64, bytes: &[u8]) -> u64 {
        for b in bytes {
            h ^= *b as u64;
            h = h.wrapping_mul(FNV_PRIME);
        }
        h
    }

    /// Hashes mnemonic, opcode, operand kinds and operation of every entry, in opcode order.
    fn current_isa_hash() -> u64 {
        let mut h = FNV_OFFSET;
        for info in Isa::new().iter() {
            h = fnv1a64(h, info.mnemonic.as_bytes());
            h = fnv1a64(h, &[info.opcode]);
            for kind in &info.operands {
                h = fnv1a64(h, kind.name().as_bytes());
            }
            h = fnv1a64(h, format!("{:?}", info.operation).as_bytes());
        }
        h
    }

    #[test]
    #[ignore]
    fn print_isa_hash() {
        println!("ISA_HASH={}", current_isa_hash());
    }

    #[test]
    fn isa_hash_unchanged() {
        assert_eq!(current_isa_hash(), EXPECTED_ISA_HASH);
    }
}
