//! JVM opcode numbers used by the analyzers, and the instruction families
//! that field-access heuristics look for.

pub const NOP: u8 = 0;
pub const ACONST_NULL: u8 = 1;
pub const ICONST_M1: u8 = 2;
pub const ICONST_0: u8 = 3;
pub const ICONST_1: u8 = 4;
pub const ICONST_2: u8 = 5;
pub const ICONST_5: u8 = 8;
pub const LCONST_0: u8 = 9;
pub const LCONST_1: u8 = 10;
pub const BIPUSH: u8 = 16;
pub const SIPUSH: u8 = 17;
pub const LDC: u8 = 18;
pub const LDC_W: u8 = 19;
pub const LDC2_W: u8 = 20;
pub const ILOAD: u8 = 21;
pub const ALOAD: u8 = 25;
pub const ALOAD_0: u8 = 42;
pub const IALOAD: u8 = 46;
pub const SALOAD: u8 = 53;
pub const ISTORE: u8 = 54;
pub const ASTORE: u8 = 58;
pub const POP: u8 = 87;
pub const DUP: u8 = 89;
pub const IADD: u8 = 96;
pub const LADD: u8 = 97;
pub const ISUB: u8 = 100;
pub const LSUB: u8 = 101;
pub const IMUL: u8 = 104;
pub const LXOR: u8 = 131;
pub const IINC: u8 = 132;
pub const LCMP: u8 = 148;
pub const FCMPL: u8 = 149;
pub const FCMPG: u8 = 150;
pub const DCMPL: u8 = 151;
pub const DCMPG: u8 = 152;
pub const IFEQ: u8 = 153;
pub const IFNE: u8 = 154;
pub const IFLE: u8 = 158;
pub const IF_ICMPEQ: u8 = 159;
pub const IF_ICMPLE: u8 = 164;
pub const GOTO: u8 = 167;
pub const IRETURN: u8 = 172;
pub const ARETURN: u8 = 176;
pub const RETURN: u8 = 177;
pub const GETSTATIC: u8 = 178;
pub const PUTSTATIC: u8 = 179;
pub const GETFIELD: u8 = 180;
pub const PUTFIELD: u8 = 181;
pub const INVOKEVIRTUAL: u8 = 182;
pub const INVOKESPECIAL: u8 = 183;
pub const INVOKESTATIC: u8 = 184;
pub const INVOKEINTERFACE: u8 = 185;
pub const NEW: u8 = 187;
pub const ANEWARRAY: u8 = 189;
pub const ATHROW: u8 = 191;
pub const CHECKCAST: u8 = 192;
pub const INSTANCEOF: u8 = 193;

pub fn is_field_read(op: u8) -> bool {
    op == GETFIELD || op == GETSTATIC
}

pub fn is_field_write(op: u8) -> bool {
    op == PUTFIELD || op == PUTSTATIC
}

pub fn is_field_insn(op: u8) -> bool {
    (GETSTATIC..=PUTFIELD).contains(&op)
}

pub fn is_invoke(op: u8) -> bool {
    (INVOKEVIRTUAL..=INVOKEINTERFACE).contains(&op)
}

pub fn is_array_load(op: u8) -> bool {
    (IALOAD..=SALOAD).contains(&op)
}

pub fn is_arithmetic(op: u8) -> bool {
    (IADD..=LXOR).contains(&op)
}

/// Branches and compares that consume a loaded value as an operand.
pub fn is_comparison(op: u8) -> bool {
    (IF_ICMPEQ..=IF_ICMPLE).contains(&op)
        || (IFEQ..=IFLE).contains(&op)
        || (LCMP..=DCMPG).contains(&op)
}

pub fn is_boolean_check(op: u8) -> bool {
    op == IFEQ || op == IFNE
}

/// `iconst_m1` through `iconst_5`.
pub fn is_small_int_const(op: u8) -> bool {
    (ICONST_M1..=ICONST_5).contains(&op)
}

pub fn is_unit_const(op: u8) -> bool {
    op == ICONST_1 || op == LCONST_1
}

pub fn is_ldc(op: u8) -> bool {
    (LDC..=LDC2_W).contains(&op)
}
