//! The tagged compound format used by `level.dat` and region chunk payloads.
//!
//! Values decode into a [`Tag`] tree. Unknown compound entries are parsed and
//! kept, so schema evolution on disk never fails a read; asking a [`Compound`]
//! for a field with the wrong tag type is a fatal decode error.

use std::io::{Read, Write};

use crate::err::NbtError;

const TAG_END: u8 = 0;
const TAG_BYTE: u8 = 1;
const TAG_SHORT: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_LONG: u8 = 4;
const TAG_FLOAT: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_BYTE_ARRAY: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_LIST: u8 = 9;
const TAG_COMPOUND: u8 = 10;
const TAG_INT_ARRAY: u8 = 11;
const TAG_LONG_ARRAY: u8 = 12;

#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<u8>),
    String(String),
    List(Vec<Tag>),
    Compound(Compound),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
}

impl Tag {
    fn id(&self) -> u8 {
        match self {
            Tag::Byte(_) => TAG_BYTE,
            Tag::Short(_) => TAG_SHORT,
            Tag::Int(_) => TAG_INT,
            Tag::Long(_) => TAG_LONG,
            Tag::Float(_) => TAG_FLOAT,
            Tag::Double(_) => TAG_DOUBLE,
            Tag::ByteArray(_) => TAG_BYTE_ARRAY,
            Tag::String(_) => TAG_STRING,
            Tag::List(_) => TAG_LIST,
            Tag::Compound(_) => TAG_COMPOUND,
            Tag::IntArray(_) => TAG_INT_ARRAY,
            Tag::LongArray(_) => TAG_LONG_ARRAY,
        }
    }
}

/// A sequence of named tags, kept in insertion order so encoding walks the
/// schema the way it was declared.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Compound {
    entries: Vec<(String, Tag)>,
}

impl Compound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tag: Tag) {
        self.entries.push((name.into(), tag));
    }

    pub fn get(&self, name: &str) -> Option<&Tag> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, tag)| tag)
    }

    pub fn compound(&self, name: &'static str) -> Result<&Compound, NbtError> {
        match self.get(name) {
            Some(Tag::Compound(c)) => Ok(c),
            Some(_) => Err(mismatch(name, "compound")),
            None => Err(NbtError::MissingField(name)),
        }
    }

    pub fn byte_array(&self, name: &'static str) -> Result<&[u8], NbtError> {
        match self.get(name) {
            Some(Tag::ByteArray(data)) => Ok(data),
            Some(_) => Err(mismatch(name, "byte array")),
            None => Err(NbtError::MissingField(name)),
        }
    }

    pub fn int(&self, name: &'static str) -> Result<i32, NbtError> {
        match self.get(name) {
            Some(Tag::Int(v)) => Ok(*v),
            Some(_) => Err(mismatch(name, "int")),
            None => Err(NbtError::MissingField(name)),
        }
    }

    pub fn long(&self, name: &'static str) -> Result<i64, NbtError> {
        match self.get(name) {
            Some(Tag::Long(v)) => Ok(*v),
            Some(_) => Err(mismatch(name, "long")),
            None => Err(NbtError::MissingField(name)),
        }
    }
}

fn mismatch(name: &str, expected: &'static str) -> NbtError {
    NbtError::TypeMismatch {
        name: name.to_owned(),
        expected,
    }
}

/// Reads a root compound and its name.
pub fn read_named(reader: &mut impl Read) -> Result<(String, Compound), NbtError> {
    let tag = read_u8(reader)?;
    if tag != TAG_COMPOUND {
        return Err(NbtError::ExpectedCompound(tag));
    }
    let name = read_string(reader)?;
    let compound = read_compound(reader)?;
    Ok((name, compound))
}

/// Writes a root compound under the given name.
pub fn write_named(
    writer: &mut impl Write,
    name: &str,
    compound: &Compound,
) -> Result<(), NbtError> {
    writer.write_all(&[TAG_COMPOUND])?;
    write_string(writer, name)?;
    write_compound(writer, compound)
}

fn read_compound(reader: &mut impl Read) -> Result<Compound, NbtError> {
    let mut compound = Compound::new();
    loop {
        let tag = read_u8(reader)?;
        if tag == TAG_END {
            break;
        }
        let name = read_string(reader)?;
        compound.insert(name, read_value(tag, reader)?);
    }
    Ok(compound)
}

fn read_list(reader: &mut impl Read) -> Result<Vec<Tag>, NbtError> {
    let element_tag = read_u8(reader)?;
    let len = read_i32(reader)?.max(0) as usize;

    let mut list = Vec::with_capacity(len);
    for _ in 0..len {
        list.push(read_value(element_tag, reader)?);
    }
    Ok(list)
}

fn read_value(tag: u8, reader: &mut impl Read) -> Result<Tag, NbtError> {
    Ok(match tag {
        TAG_BYTE => Tag::Byte(read_u8(reader)? as i8),
        TAG_SHORT => Tag::Short(read_i16(reader)?),
        TAG_INT => Tag::Int(read_i32(reader)?),
        TAG_LONG => Tag::Long(read_i64(reader)?),
        TAG_FLOAT => {
            let mut buf = [0; 4];
            reader.read_exact(&mut buf)?;
            Tag::Float(f32::from_be_bytes(buf))
        }
        TAG_DOUBLE => {
            let mut buf = [0; 8];
            reader.read_exact(&mut buf)?;
            Tag::Double(f64::from_be_bytes(buf))
        }
        TAG_BYTE_ARRAY => {
            let len = read_i32(reader)?.max(0) as usize;
            let mut data = vec![0u8; len];
            reader.read_exact(&mut data)?;
            Tag::ByteArray(data)
        }
        TAG_STRING => Tag::String(read_string(reader)?),
        TAG_LIST => Tag::List(read_list(reader)?),
        TAG_COMPOUND => Tag::Compound(read_compound(reader)?),
        TAG_INT_ARRAY => {
            let len = read_i32(reader)?.max(0) as usize;
            let mut data = Vec::with_capacity(len);
            for _ in 0..len {
                data.push(read_i32(reader)?);
            }
            Tag::IntArray(data)
        }
        TAG_LONG_ARRAY => {
            let len = read_i32(reader)?.max(0) as usize;
            let mut data = Vec::with_capacity(len);
            for _ in 0..len {
                data.push(read_i64(reader)?);
            }
            Tag::LongArray(data)
        }
        other => return Err(NbtError::UnknownTag(other)),
    })
}

fn write_compound(writer: &mut impl Write, compound: &Compound) -> Result<(), NbtError> {
    for (name, tag) in &compound.entries {
        writer.write_all(&[tag.id()])?;
        write_string(writer, name)?;
        write_value(writer, tag)?;
    }
    writer.write_all(&[TAG_END])?;
    Ok(())
}

fn write_value(writer: &mut impl Write, tag: &Tag) -> Result<(), NbtError> {
    match tag {
        Tag::Byte(v) => writer.write_all(&[*v as u8])?,
        Tag::Short(v) => writer.write_all(&v.to_be_bytes())?,
        Tag::Int(v) => writer.write_all(&v.to_be_bytes())?,
        Tag::Long(v) => writer.write_all(&v.to_be_bytes())?,
        Tag::Float(v) => writer.write_all(&v.to_be_bytes())?,
        Tag::Double(v) => writer.write_all(&v.to_be_bytes())?,
        Tag::ByteArray(data) => {
            writer.write_all(&(data.len() as i32).to_be_bytes())?;
            writer.write_all(data)?;
        }
        Tag::String(s) => write_string(writer, s)?,
        Tag::List(list) => {
            let element_tag = list.first().map(Tag::id).unwrap_or(TAG_END);
            writer.write_all(&[element_tag])?;
            writer.write_all(&(list.len() as i32).to_be_bytes())?;
            for item in list {
                write_value(writer, item)?;
            }
        }
        Tag::Compound(c) => write_compound(writer, c)?,
        Tag::IntArray(data) => {
            writer.write_all(&(data.len() as i32).to_be_bytes())?;
            for v in data {
                writer.write_all(&v.to_be_bytes())?;
            }
        }
        Tag::LongArray(data) => {
            writer.write_all(&(data.len() as i32).to_be_bytes())?;
            for v in data {
                writer.write_all(&v.to_be_bytes())?;
            }
        }
    }
    Ok(())
}

// NBT strings carry an unsigned length with raw bytes, unlike the protocol's
// UTF-16 strings.
fn read_string(reader: &mut impl Read) -> Result<String, NbtError> {
    let mut buf = [0; 2];
    reader.read_exact(&mut buf)?;
    let len = u16::from_be_bytes(buf) as usize;

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}

fn write_string(writer: &mut impl Write, s: &str) -> Result<(), NbtError> {
    writer.write_all(&(s.len() as u16).to_be_bytes())?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

fn read_u8(reader: &mut impl Read) -> Result<u8, NbtError> {
    let mut buf = [0; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_i16(reader: &mut impl Read) -> Result<i16, NbtError> {
    let mut buf = [0; 2];
    reader.read_exact(&mut buf)?;
    Ok(i16::from_be_bytes(buf))
}

fn read_i32(reader: &mut impl Read) -> Result<i32, NbtError> {
    let mut buf = [0; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

fn read_i64(reader: &mut impl Read) -> Result<i64, NbtError> {
    let mut buf = [0; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

#[cfg(test)]
mod test {
    use super::*;

    // Test case inspired by the wiki.vg 'bigtest.nbt' sample
    fn big_compound() -> Compound {
        let mut egg = Compound::new();
        egg.insert("Name", Tag::String("Eggbert".into()));
        egg.insert("Value", Tag::Float(0.5));
        let mut ham = Compound::new();
        ham.insert("Name", Tag::String("Hampus".into()));
        ham.insert("Value", Tag::Float(0.75));
        let mut nested = Compound::new();
        nested.insert("Egg", Tag::Compound(egg));
        nested.insert("Ham", Tag::Compound(ham));

        let mut root = Compound::new();
        root.insert("Nested", Tag::Compound(nested));
        root.insert("IntTest", Tag::Int(2147483647));
        root.insert("ShortTest", Tag::Short(i16::MAX));
        root.insert("ByteTest", Tag::Byte(127));
        root.insert("StringTest", Tag::String("Hello, world!".into()));
        root.insert(
            "LongList",
            Tag::List(vec![
                Tag::Long(11),
                Tag::Long(12),
                Tag::Long(i64::MAX),
                Tag::Long(i64::MIN),
            ]),
        );
        root.insert("DoubleTest", Tag::Double(0.49312871321823148));
        root.insert("FloatTest", Tag::Float(0.4931287));
        root.insert("LongTest", Tag::Long(i64::MAX));
        root.insert("BytesTest", Tag::ByteArray(vec![0xff, 0xa7]));
        root.insert("IntsTest", Tag::IntArray(vec![123, i32::MAX, i32::MIN, 321]));
        root.insert("LongsTest", Tag::LongArray(vec![-1, 0, 1]));
        root
    }

    #[test]
    fn roundtrip_nested() {
        let root = big_compound();
        let mut buf = vec![];
        write_named(&mut buf, "Level", &root).unwrap();

        let (name, decoded) = read_named(&mut buf.as_slice()).unwrap();
        assert_eq!(name, "Level");
        assert_eq!(decoded, root);
    }

    #[test]
    fn negative_list_length_reads_empty() {
        // compound { "L": List<Byte>[-1] }
        let mut buf = vec![];
        buf.extend_from_slice(&[TAG_COMPOUND, 0, 0]);
        buf.extend_from_slice(&[TAG_LIST, 0, 1, b'L', TAG_BYTE]);
        buf.extend_from_slice(&(-1i32).to_be_bytes());
        buf.push(TAG_END);

        let (_, decoded) = read_named(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded.get("L"), Some(&Tag::List(vec![])));
    }

    #[test]
    fn unknown_fields_are_kept_not_fatal() {
        let mut root = Compound::new();
        root.insert("SpawnX", Tag::Int(8));
        root.insert("SomethingNewer", Tag::String("ignored".into()));
        let mut buf = vec![];
        write_named(&mut buf, "", &root).unwrap();

        let (_, decoded) = read_named(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded.int("SpawnX").unwrap(), 8);
    }

    #[test]
    fn type_mismatch_is_fatal() {
        let mut root = Compound::new();
        root.insert("RandomSeed", Tag::Int(1));
        assert!(root.long("RandomSeed").is_err());
        assert!(root.int("RandomSeed").is_ok());
    }

    #[test]
    fn missing_field() {
        let root = Compound::new();
        assert!(matches!(
            root.long("RandomSeed"),
            Err(NbtError::MissingField("RandomSeed"))
        ));
    }

    #[test]
    fn not_a_compound_root() {
        let buf = vec![TAG_BYTE, 0, 0, 7];
        assert!(matches!(
            read_named(&mut buf.as_slice()),
            Err(NbtError::ExpectedCompound(TAG_BYTE))
        ));
    }
}
