use std::{fmt, ops};
use std::fmt::Formatter;
use std::ops::Range;
use byteorder::{BigEndian, ByteOrder};
use itertools::Itertools;

/// A flat bytecode stream: one opcode byte followed by its big-endian
/// operands, repeated.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Instructions(Vec<u8>);

impl Instructions {
    pub fn new(vec: Vec<u8>) -> Self {
        Instructions(vec)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn append_vec(&mut self, other: &mut Vec<u8>) {
        self.0.append(other)
    }

    /// Overwrites bytes starting at `pos`, used to backpatch operands.
    pub fn replace(&mut self, pos: usize, bytes: &[u8]) {
        self.0[pos..pos + bytes.len()].copy_from_slice(bytes);
    }

    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn to_vec(self) -> Vec<u8> {
        self.0
    }

    fn format_instruction(def: &Definition, operands: &[usize]) -> String {
        if operands.is_empty() {
            def.name.to_string()
        } else {
            format!("{} {}", def.name, operands.iter().join(" "))
        }
    }
}

/// Disassembly, one `OFFSET NAME OPERANDS` line per instruction.
impl fmt::Display for Instructions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut pos = 0;
        while pos < self.0.len() {
            let def = match lookup(self.0[pos]) {
                Err(err) => {
                    writeln!(f, "ERROR: {}", err)?;
                    pos += 1;
                    continue;
                },
                Ok(def) => def,
            };

            match read_operands(def, &self.0[(pos + 1)..]) {
                Ok((operands, read)) => {
                    writeln!(f, "{:0>4} {}", pos, Self::format_instruction(def, &operands))?;
                    pos += 1 + read;
                },
                Err(err) => {
                    writeln!(f, "{:0>4} ERROR: {}", pos, err)?;
                    break;
                }
            }
        }
        Ok(())
    }
}

impl From<Vec<u8>> for Instructions {
    fn from(vec: Vec<u8>) -> Self {
        Instructions(vec)
    }
}

impl ops::Index<usize> for Instructions {
    type Output = u8;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl ops::Index<ops::Range<usize>> for Instructions {
    type Output = [u8];

    fn index(&self, index: Range<usize>) -> &Self::Output {
        &self.0[index]
    }
}

pub type Opcode = u8;

#[derive(Debug, Eq, PartialEq)]
pub struct Definition {
    pub name: &'static str,
    pub operand_widths: &'static [usize],
}

/// Indexed by opcode byte; the order must match [`Operation`].
pub const DEFINITIONS: &[Definition] = &[
    Definition { name: "OpConstant", operand_widths: &[2] },
    Definition { name: "OpAdd", operand_widths: &[] },
    Definition { name: "OpPop", operand_widths: &[] },
    Definition { name: "OpSub", operand_widths: &[] },
    Definition { name: "OpMul", operand_widths: &[] },
    Definition { name: "OpDiv", operand_widths: &[] },
    Definition { name: "OpTrue", operand_widths: &[] },
    Definition { name: "OpFalse", operand_widths: &[] },
    Definition { name: "OpEqual", operand_widths: &[] },
    Definition { name: "OpNotEqual", operand_widths: &[] },
    Definition { name: "OpGreaterThan", operand_widths: &[] },
    Definition { name: "OpMinus", operand_widths: &[] },
    Definition { name: "OpBang", operand_widths: &[] },
    Definition { name: "OpJumpNotTruthy", operand_widths: &[2] },
    Definition { name: "OpJump", operand_widths: &[2] },
    Definition { name: "OpNull", operand_widths: &[] },
    Definition { name: "OpGetGlobal", operand_widths: &[2] },
    Definition { name: "OpSetGlobal", operand_widths: &[2] },
    Definition { name: "OpArray", operand_widths: &[2] },
    Definition { name: "OpHash", operand_widths: &[2] },
    Definition { name: "OpIndex", operand_widths: &[] },
    Definition { name: "OpCall", operand_widths: &[1] },
    Definition { name: "OpReturnValue", operand_widths: &[] },
    Definition { name: "OpReturn", operand_widths: &[] },
    Definition { name: "OpGetLocal", operand_widths: &[1] },
    Definition { name: "OpSetLocal", operand_widths: &[1] },
    Definition { name: "OpClosure", operand_widths: &[2, 1] },
    Definition { name: "OpGetFree", operand_widths: &[1] },
    Definition { name: "OpCurrentClosure", operand_widths: &[] },
];

pub fn lookup(op: Opcode) -> Result<&'static Definition, String> {
    DEFINITIONS.get(op as usize).ok_or_else(|| format!("opcode {} undefined", op))
}

// variants are numbered from 0 in declaration order
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Operation {
    OpConstant,
    OpAdd,
    OpPop,
    OpSub,
    OpMul,
    OpDiv,
    OpTrue,
    OpFalse,
    OpEqual,
    OpNotEqual,
    OpGreaterThan,
    OpMinus,
    OpBang,
    OpJumpNotTruthy,
    OpJump,
    OpNull,
    OpGetGlobal,
    OpSetGlobal,
    OpArray,
    OpHash,
    OpIndex,
    OpCall,
    OpReturnValue,
    OpReturn,
    OpGetLocal,
    OpSetLocal,
    OpClosure,
    OpGetFree,
    OpCurrentClosure,
}

impl Operation {
    pub const ALL: [Operation; 29] = [
        Operation::OpConstant,
        Operation::OpAdd,
        Operation::OpPop,
        Operation::OpSub,
        Operation::OpMul,
        Operation::OpDiv,
        Operation::OpTrue,
        Operation::OpFalse,
        Operation::OpEqual,
        Operation::OpNotEqual,
        Operation::OpGreaterThan,
        Operation::OpMinus,
        Operation::OpBang,
        Operation::OpJumpNotTruthy,
        Operation::OpJump,
        Operation::OpNull,
        Operation::OpGetGlobal,
        Operation::OpSetGlobal,
        Operation::OpArray,
        Operation::OpHash,
        Operation::OpIndex,
        Operation::OpCall,
        Operation::OpReturnValue,
        Operation::OpReturn,
        Operation::OpGetLocal,
        Operation::OpSetLocal,
        Operation::OpClosure,
        Operation::OpGetFree,
        Operation::OpCurrentClosure,
    ];

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.get(byte as usize).copied()
    }

    pub fn as_byte(&self) -> Opcode {
        *self as Opcode
    }

    pub fn definition(&self) -> &'static Definition {
        &DEFINITIONS[*self as usize]
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.definition().name)
    }
}

/// Encodes one instruction. Operands wider than their declared width are
/// truncated; missing operands are written as zero.
pub fn make(op: Operation, operands: &[usize]) -> Vec<u8> {
    let def = op.definition();

    let instruction_len = 1 + def.operand_widths.iter().sum::<usize>();

    let mut instruction = Vec::with_capacity(instruction_len);
    instruction.push(op.as_byte());

    for (i, width) in def.operand_widths.iter().enumerate() {
        let o = operands.get(i).copied().unwrap_or(0);
        match width {
            2 => {
                let mut buf = [0u8; 2];
                BigEndian::write_u16(&mut buf, o as u16);
                instruction.extend_from_slice(&buf);
            },
            1 => instruction.push(o as u8),
            _ => unreachable!("operand width {} is not defined for any opcode", width),
        }
    }

    instruction
}

// read_operands parses the operand part of an instruction and returns the operands and the bytes read
pub fn read_operands(def: &Definition, ins: &[u8]) -> Result<(Vec<usize>, usize), String> {
    let mut operands = Vec::with_capacity(def.operand_widths.len());
    let mut offset: usize = 0;

    for width in def.operand_widths {
        if ins.len() < offset + width {
            return Err(format!("truncated operands for {}", def.name));
        }
        match width {
            2 => operands.push(read_u16(&ins[offset..]) as usize),
            1 => operands.push(ins[offset] as usize),
            other => return Err(format!("unsupported width: {}", other))
        }
        offset += *width;
    }

    Ok((operands, offset))
}

pub fn read_u16(ins: &[u8]) -> u16 {
    BigEndian::read_u16(ins)
}

#[cfg(test)]
mod test {
    use itertools::concat;
    use pretty_assertions::assert_eq;
    use crate::code::{lookup, make, read_operands, Instructions, Operation, DEFINITIONS};

    #[test]
    fn test_make() {
        struct Test {
            op: Operation,
            operands: Vec<usize>,
            expected: Vec<u8>,
        }
        let tests = vec![
            Test{op: Operation::OpConstant, operands: vec![65534], expected: vec![Operation::OpConstant.as_byte(), 255, 254]},
            Test{op: Operation::OpAdd, operands: vec![], expected: vec![Operation::OpAdd.as_byte()]},
            Test{op: Operation::OpGetLocal, operands: vec![255], expected: vec![Operation::OpGetLocal.as_byte(), 255]},
            Test{op: Operation::OpClosure, operands: vec![65534, 255], expected: vec![Operation::OpClosure.as_byte(), 255, 254, 255]},
        ];

        for tt in tests {
            let instruction = make(tt.op, &tt.operands);
            assert_eq!(instruction.len(), tt.expected.len());
            assert_eq!(instruction, tt.expected);
        }
    }

    #[test]
    fn test_make_truncates_wide_operands() {
        assert_eq!(make(Operation::OpConstant, &[65536 + 7]), vec![Operation::OpConstant.as_byte(), 0, 7]);
        assert_eq!(make(Operation::OpCall, &[256 + 3]), vec![Operation::OpCall.as_byte(), 3]);
    }

    #[test]
    fn test_instructions_string() {
        let instructions = vec![
            make(Operation::OpAdd, &[]),
            make(Operation::OpGetLocal, &[1]),
            make(Operation::OpConstant, &[2]),
            make(Operation::OpConstant, &[65535]),
            make(Operation::OpClosure, &[65535, 255]),
        ];

        let expected = r#"0000 OpAdd
0001 OpGetLocal 1
0003 OpConstant 2
0006 OpConstant 65535
0009 OpClosure 65535 255
"#;

        let concatted = Instructions::new(concat(instructions));
        assert_eq!(concatted.to_string(), expected);
    }

    #[test]
    fn test_disassemble_unknown_opcode() {
        let mut bytes = make(Operation::OpTrue, &[]);
        bytes.push(200);
        bytes.extend(make(Operation::OpPop, &[]));
        let expected = "0000 OpTrue\nERROR: opcode 200 undefined\n0002 OpPop\n";
        assert_eq!(Instructions::new(bytes).to_string(), expected);
    }

    #[test]
    fn test_disassemble_truncated_instruction() {
        let bytes = vec![Operation::OpConstant.as_byte(), 0];
        assert_eq!(Instructions::new(bytes).to_string(), "0000 ERROR: truncated operands for OpConstant\n");
    }

    #[test]
    fn test_read_operands() {
        struct Test {
            op: Operation,
            operands: Vec<usize>,
            byte_read: usize,
        }
        let tests = vec![
            Test{op: Operation::OpConstant, operands: vec![65535], byte_read: 2},
            Test{op: Operation::OpGetLocal, operands: vec![255], byte_read: 1},
            Test{op: Operation::OpClosure, operands: vec![65535, 255], byte_read: 3},
        ];

        for tt in tests {
            let instruction = make(tt.op, &tt.operands);
            let def = lookup(tt.op.as_byte()).expect("definition not found");

            let (operands, n) = read_operands(def, &instruction[1..]).unwrap();

            assert_eq!(n, tt.byte_read);
            assert_eq!(operands, tt.operands);
        }
    }

    #[test]
    fn test_definitions_match_operations() {
        assert_eq!(DEFINITIONS.len(), Operation::ALL.len());
        for (i, op) in Operation::ALL.iter().enumerate() {
            assert_eq!(op.as_byte() as usize, i);
            assert_eq!(Operation::from_byte(i as u8), Some(*op));
            assert_eq!(format!("{:?}", op), DEFINITIONS[i].name);
        }
        assert_eq!(Operation::from_byte(Operation::ALL.len() as u8), None);
    }
}
