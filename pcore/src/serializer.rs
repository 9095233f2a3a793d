//! Mode-parameterized byte serializer.
//!
//! Every serializable type describes its fields once through
//! [`Serializable::visit`], the same visit then runs with one of three
//! cursors:
//!
//! | Mode    | Cursor       | Effect |
//! | ------- | ------------ | ------ |
//! | Measure | [`Measurer`] | Advances a virtual position, touches no memory |
//! | Write   | [`Writer`]   | Copies values into a caller supplied buffer |
//! | Read    | [`Reader`]   | Fills values from a buffer, variable length data borrows from it |
//!
//! Unless other wise noted everything is stored in Little Endian format.
//!
//! | Value   | Encoding |
//! | ------- | -------- |
//! | primitive | fixed size, no padding |
//! | bytes   | `u32` length, zero padding up to the alignment (relative to the buffer start), payload |
//! | string  | `u32` length, `0` is absent, otherwise `len + 1` followed by UTF-8 bytes and a NUL |
//! | array   | `u32` count followed by each element |
//!
//! The measured size must equal the number of bytes written for the same
//! value, [`to_vec`] checks this on every call.
use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::arena::{Arena, ArenaError};

pub const DEFAULT_ALIGNMENT: usize = 8;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SerializerError {
    #[error("unexpected end of data at {position} ({needed} bytes needed)")]
    UnexpectedEnd { position: usize, needed: usize },
    #[error("destination buffer exhausted at {position} ({needed} bytes needed)")]
    BufferExhausted { position: usize, needed: usize },
    #[error("invalid {name} value {value}")]
    InvalidEnum { name: &'static str, value: u64 },
    #[error("invalid bool value {0}")]
    InvalidBool(u8),
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    #[error("string is missing its NUL terminator")]
    MissingTerminator,
    #[error("array count {count} exceeds the {remaining} remaining bytes")]
    CountOverflow { count: usize, remaining: usize },
    #[error("length {0} does not fit in a u32")]
    LengthOverflow(usize),
    #[error("measured {measured} bytes but wrote {written}")]
    SizeMismatch { measured: usize, written: usize },
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
    #[error(transparent)]
    Allocation(#[from] ArenaError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SerializerMode {
    Measure,
    Write,
    Read,
}

/// Fixed size value that is copied as is.
pub trait Primitive: Copy {
    const SIZE: usize;

    fn encode(&self, out: &mut [u8]);
    fn decode(src: &[u8]) -> Result<Self, SerializerError>;
}

macro_rules! primitive_int {
    ($($ty:ty => $read:ident, $write:ident;)+) => {
        $(
            impl Primitive for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn encode(&self, out: &mut [u8]) {
                    LittleEndian::$write(out, *self);
                }

                fn decode(src: &[u8]) -> Result<Self, SerializerError> {
                    Ok(LittleEndian::$read(src))
                }
            }
        )+
    };
}

primitive_int! {
    u16 => read_u16, write_u16;
    u32 => read_u32, write_u32;
    u64 => read_u64, write_u64;
    i16 => read_i16, write_i16;
    i32 => read_i32, write_i32;
    i64 => read_i64, write_i64;
    f32 => read_f32, write_f32;
    f64 => read_f64, write_f64;
}

impl Primitive for u8 {
    const SIZE: usize = 1;

    fn encode(&self, out: &mut [u8]) {
        out[0] = *self;
    }

    fn decode(src: &[u8]) -> Result<Self, SerializerError> {
        Ok(src[0])
    }
}

impl Primitive for i8 {
    const SIZE: usize = 1;

    fn encode(&self, out: &mut [u8]) {
        out[0] = *self as u8;
    }

    fn decode(src: &[u8]) -> Result<Self, SerializerError> {
        Ok(src[0] as i8)
    }
}

impl Primitive for bool {
    const SIZE: usize = 1;

    fn encode(&self, out: &mut [u8]) {
        out[0] = *self as u8;
    }

    fn decode(src: &[u8]) -> Result<Self, SerializerError> {
        match src[0] {
            0 => Ok(false),
            1 => Ok(true),
            x => Err(SerializerError::InvalidBool(x)),
        }
    }
}

impl<P: Primitive + Default, const N: usize> Primitive for [P; N] {
    const SIZE: usize = P::SIZE * N;

    fn encode(&self, out: &mut [u8]) {
        for (value, chunk) in self.iter().zip(out.chunks_exact_mut(P::SIZE)) {
            value.encode(chunk);
        }
    }

    fn decode(src: &[u8]) -> Result<Self, SerializerError> {
        let mut ret = [P::default(); N];
        for (value, chunk) in ret.iter_mut().zip(src.chunks_exact(P::SIZE)) {
            *value = P::decode(chunk)?;
        }
        Ok(ret)
    }
}

/// Declares a fieldless enum with an explicit representation and implements
/// [`Primitive`] for it, unknown discriminants fail to decode.
#[macro_export]
macro_rules! primitive_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $repr:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr($repr)]
        $vis enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl $crate::serializer::Primitive for $name {
            const SIZE: usize = <$repr as $crate::serializer::Primitive>::SIZE;

            fn encode(&self, out: &mut [u8]) {
                $crate::serializer::Primitive::encode(&(*self as $repr), out)
            }

            fn decode(src: &[u8]) -> ::core::result::Result<Self, $crate::serializer::SerializerError> {
                let raw = <$repr as $crate::serializer::Primitive>::decode(src)?;
                $(
                    if raw == $value {
                        return Ok($name::$variant);
                    }
                )+
                Err($crate::serializer::SerializerError::InvalidEnum {
                    name: stringify!($name),
                    value: raw as u64,
                })
            }
        }
    };
}

/// A cursor in one of the three serializer modes.
///
/// `'a` is the lifetime of the data handed out in Read mode, slices of the
/// source buffer or of the reader's arena.
pub trait Serializer<'a>: Sized {
    const MODE: SerializerMode;

    fn position(&self) -> usize;

    /// True once the cursor reached the end of its buffer, always false when measuring.
    fn is_exhausted(&self) -> bool;

    fn primitive<P: Primitive>(&mut self, value: &mut P) -> Result<(), SerializerError>;

    fn bytes_aligned(&mut self, value: &mut &'a [u8], align: usize) -> Result<(), SerializerError>;

    fn bytes(&mut self, value: &mut &'a [u8]) -> Result<(), SerializerError> {
        self.bytes_aligned(value, DEFAULT_ALIGNMENT)
    }

    fn string(&mut self, value: &mut Option<&'a str>) -> Result<(), SerializerError>;

    fn array<T, F>(&mut self, value: &mut &'a [T], visit: F) -> Result<(), SerializerError>
    where
        T: Copy + Default + 'a,
        F: FnMut(&mut Self, &mut T) -> Result<(), SerializerError>;

    fn raw_array<P: Primitive + Default + 'a>(&mut self, value: &mut &'a [P]) -> Result<(), SerializerError> {
        self.array(value, |ser, item| ser.primitive(item))
    }

    /// Convenience for lengths and counts.
    fn length(&mut self, len: usize) -> Result<u32, SerializerError> {
        let mut len = u32::try_from(len).map_err(|_| SerializerError::LengthOverflow(len))?;
        self.primitive(&mut len)?;
        Ok(len)
    }
}

/// Type whose fields can be walked by any [`Serializer`].
pub trait Serializable<'a>: Copy + Default {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError>;
}

fn align_up(position: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (position + align - 1) & !(align - 1)
}

#[derive(Default, Debug)]
pub struct Measurer {
    pos: usize,
}

impl Measurer {
    pub fn new() -> Self {
        Measurer { pos: 0 }
    }
}

impl<'a> Serializer<'a> for Measurer {
    const MODE: SerializerMode = SerializerMode::Measure;

    fn position(&self) -> usize {
        self.pos
    }

    fn is_exhausted(&self) -> bool {
        false
    }

    fn primitive<P: Primitive>(&mut self, _value: &mut P) -> Result<(), SerializerError> {
        self.pos += P::SIZE;
        Ok(())
    }

    fn bytes_aligned(&mut self, value: &mut &'a [u8], align: usize) -> Result<(), SerializerError> {
        self.length(value.len())?;
        self.pos = align_up(self.pos, align) + value.len();
        Ok(())
    }

    fn string(&mut self, value: &mut Option<&'a str>) -> Result<(), SerializerError> {
        match value {
            None => self.length(0).map(|_| ()),
            Some(s) => {
                self.length(s.len() + 1)?;
                self.pos += s.len() + 1;
                Ok(())
            }
        }
    }

    fn array<T, F>(&mut self, value: &mut &'a [T], mut visit: F) -> Result<(), SerializerError>
    where
        T: Copy + Default + 'a,
        F: FnMut(&mut Self, &mut T) -> Result<(), SerializerError>,
    {
        self.length(value.len())?;
        for item in value.iter() {
            let mut item = *item;
            visit(self, &mut item)?;
        }
        Ok(())
    }
}

pub struct Writer<'b> {
    buf: &'b mut [u8],
    pos: usize,
}

impl<'b> Writer<'b> {
    pub fn new(buf: &'b mut [u8]) -> Self {
        Writer { buf, pos: 0 }
    }

    fn reserve(&mut self, needed: usize) -> Result<&mut [u8], SerializerError> {
        let end = self
            .pos
            .checked_add(needed)
            .filter(|end| *end <= self.buf.len())
            .ok_or(SerializerError::BufferExhausted {
                position: self.pos,
                needed,
            })?;
        let out = &mut self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn copy(&mut self, data: &[u8]) -> Result<(), SerializerError> {
        self.reserve(data.len())?.copy_from_slice(data);
        Ok(())
    }
}

impl<'a, 'b> Serializer<'a> for Writer<'b> {
    const MODE: SerializerMode = SerializerMode::Write;

    fn position(&self) -> usize {
        self.pos
    }

    fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn primitive<P: Primitive>(&mut self, value: &mut P) -> Result<(), SerializerError> {
        value.encode(self.reserve(P::SIZE)?);
        Ok(())
    }

    fn bytes_aligned(&mut self, value: &mut &'a [u8], align: usize) -> Result<(), SerializerError> {
        self.length(value.len())?;
        let padding = align_up(self.pos, align) - self.pos;
        self.reserve(padding)?.fill(0);
        self.copy(value)
    }

    fn string(&mut self, value: &mut Option<&'a str>) -> Result<(), SerializerError> {
        match value {
            None => self.length(0).map(|_| ()),
            Some(s) => {
                self.length(s.len() + 1)?;
                self.copy(s.as_bytes())?;
                self.copy(&[0])
            }
        }
    }

    fn array<T, F>(&mut self, value: &mut &'a [T], mut visit: F) -> Result<(), SerializerError>
    where
        T: Copy + Default + 'a,
        F: FnMut(&mut Self, &mut T) -> Result<(), SerializerError>,
    {
        self.length(value.len())?;
        for item in value.iter() {
            let mut item = *item;
            visit(self, &mut item)?;
        }
        Ok(())
    }
}

pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    arena: &'a Arena,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], arena: &'a Arena) -> Self {
        Reader { data, pos: 0, arena }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn arena(&self) -> &'a Arena {
        self.arena
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], SerializerError> {
        let end = self
            .pos
            .checked_add(needed)
            .filter(|end| *end <= self.data.len())
            .ok_or(SerializerError::UnexpectedEnd {
                position: self.pos,
                needed,
            })?;
        let data: &'a [u8] = self.data;
        let out = &data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn read_len(&mut self) -> Result<usize, SerializerError> {
        let mut len = 0u32;
        self.primitive(&mut len)?;
        Ok(len as usize)
    }
}

impl<'a> Serializer<'a> for Reader<'a> {
    const MODE: SerializerMode = SerializerMode::Read;

    fn position(&self) -> usize {
        self.pos
    }

    fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn primitive<P: Primitive>(&mut self, value: &mut P) -> Result<(), SerializerError> {
        *value = P::decode(self.take(P::SIZE)?)?;
        Ok(())
    }

    fn bytes_aligned(&mut self, value: &mut &'a [u8], align: usize) -> Result<(), SerializerError> {
        let len = self.read_len()?;
        let padding = align_up(self.pos, align) - self.pos;
        self.take(padding)?;
        *value = self.take(len)?;
        Ok(())
    }

    fn string(&mut self, value: &mut Option<&'a str>) -> Result<(), SerializerError> {
        let len = self.read_len()?;
        if len == 0 {
            *value = None;
            return Ok(());
        }

        let data = self.take(len)?;
        let (text, terminator) = data.split_at(len - 1);
        if terminator != [0] {
            return Err(SerializerError::MissingTerminator);
        }
        *value = Some(std::str::from_utf8(text).map_err(|_| SerializerError::InvalidUtf8)?);
        Ok(())
    }

    fn array<T, F>(&mut self, value: &mut &'a [T], mut visit: F) -> Result<(), SerializerError>
    where
        T: Copy + Default + 'a,
        F: FnMut(&mut Self, &mut T) -> Result<(), SerializerError>,
    {
        let count = self.read_len()?;
        // Every element occupies at least one byte
        if count > self.remaining() {
            return Err(SerializerError::CountOverflow {
                count,
                remaining: self.remaining(),
            });
        }

        let items: &'a mut [T] = self.arena.alloc_slice_default(count)?;
        for item in items.iter_mut() {
            visit(self, item)?;
        }
        *value = items;
        Ok(())
    }
}

/// Measures then writes `value`, checking both passes agree.
pub fn to_vec<'a, T: Serializable<'a>>(value: &T) -> Result<Vec<u8>, SerializerError> {
    let mut value = *value;

    let mut measure = Measurer::new();
    value.visit(&mut measure)?;
    let measured = Serializer::<'a>::position(&measure);

    let mut buf = vec![0; measured];
    let mut writer = Writer::new(&mut buf);
    value.visit(&mut writer)?;
    let written = Serializer::<'a>::position(&writer);

    if measured != written {
        return Err(SerializerError::SizeMismatch { measured, written });
    }
    Ok(buf)
}

/// Reads one `T` that must span all of `data`.
pub fn from_bytes<'a, T: Serializable<'a>>(data: &'a [u8], arena: &'a Arena) -> Result<T, SerializerError> {
    let mut reader = Reader::new(data, arena);
    let mut value = T::default();
    value.visit(&mut reader)?;

    if !reader.is_exhausted() {
        return Err(SerializerError::TrailingBytes(reader.remaining()));
    }
    Ok(value)
}

#[cfg(test)]
mod test_serializer {
    use super::*;

    primitive_enum! {
        #[derive(Default)]
        enum Color: u8 {
            #[default]
            Red = 1,
            Green = 2,
        }
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    struct Point<'a> {
        name: Option<&'a str>,
        xy: [f32; 2],
    }

    impl<'a> Serializable<'a> for Point<'a> {
        fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
            ser.string(&mut self.name)?;
            ser.primitive(&mut self.xy)
        }
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    struct Shape<'a> {
        color: Color,
        visible: bool,
        id: u64,
        tag: Option<&'a str>,
        blob: &'a [u8],
        points: &'a [Point<'a>],
        weights: &'a [u16],
    }

    impl<'a> Serializable<'a> for Shape<'a> {
        fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
            ser.primitive(&mut self.color)?;
            ser.primitive(&mut self.visible)?;
            ser.primitive(&mut self.id)?;
            ser.string(&mut self.tag)?;
            ser.bytes(&mut self.blob)?;
            ser.array(&mut self.points, |ser, point| point.visit(ser))?;
            ser.raw_array(&mut self.weights)
        }
    }

    fn sample() -> Shape<'static> {
        Shape {
            color: Color::Green,
            visible: true,
            id: 0x0102030405060708,
            tag: Some(""),
            blob: &[0x10, 0x20, 0x30],
            points: &[
                Point { name: Some("a"), xy: [1.0, 2.0] },
                Point { name: None, xy: [-1.5, 0.25] },
            ],
            weights: &[1, 2, 3],
        }
    }

    #[test]
    fn round_trip() {
        let shape = sample();
        let data = to_vec(&shape).unwrap();

        let arena = Arena::new();
        let read: Shape = from_bytes(&data, &arena).unwrap();

        assert_eq!(read, shape);
    }

    #[test]
    fn measure_equals_write() {
        let mut shape = sample();
        let mut measure = Measurer::new();
        shape.visit(&mut measure).unwrap();

        assert_eq!(Serializer::position(&measure), to_vec(&shape).unwrap().len());
    }

    #[test]
    fn read_borrows_source() {
        let data = to_vec(&sample()).unwrap();
        let arena = Arena::new();
        let read: Shape = from_bytes(&data, &arena).unwrap();

        let range = data.as_ptr_range();
        assert!(range.contains(&read.blob.as_ptr()));
        assert!(range.contains(&read.tag.unwrap().as_ptr()));
        assert!(!range.contains(&read.points.as_ptr().cast()));
    }

    #[test]
    fn string_encoding() {
        let mut value: Option<&str> = None;
        let mut buf = [0xff; 4];
        Writer::new(&mut buf).string(&mut value).unwrap();
        assert_eq!(buf, [0, 0, 0, 0]);

        let mut value = Some("");
        let mut buf = [0xff; 5];
        Writer::new(&mut buf).string(&mut value).unwrap();
        assert_eq!(buf, [1, 0, 0, 0, 0]);

        let mut value = Some("hi");
        let mut buf = [0xff; 7];
        Writer::new(&mut buf).string(&mut value).unwrap();
        assert_eq!(buf, [3, 0, 0, 0, b'h', b'i', 0]);
    }

    #[test]
    fn bytes_padding_is_zeroed() {
        let mut value: &[u8] = &[0xaa];
        let mut buf = [0xff; 9];
        Writer::new(&mut buf).bytes(&mut value).unwrap();

        assert_eq!(buf, [1, 0, 0, 0, 0, 0, 0, 0, 0xaa]);
    }

    #[test]
    fn write_exhausted() {
        let mut shape = sample();
        let mut buf = vec![0; to_vec(&shape).unwrap().len() - 1];

        assert!(matches!(
            shape.visit(&mut Writer::new(&mut buf)),
            Err(SerializerError::BufferExhausted { .. })
        ));
    }

    #[test]
    fn read_truncated() {
        let data = to_vec(&sample()).unwrap();
        let arena = Arena::new();

        for len in 0..data.len() {
            assert!(from_bytes::<Shape>(&data[..len], &arena).is_err(), "len {}", len);
        }
    }

    #[test]
    fn read_trailing() {
        let mut data = to_vec(&sample()).unwrap();
        data.push(0);
        let arena = Arena::new();

        assert_eq!(
            from_bytes::<Shape>(&data, &arena).unwrap_err(),
            SerializerError::TrailingBytes(1)
        );
    }

    #[test]
    fn invalid_enum_and_bool() {
        let arena = Arena::new();
        let mut reader = Reader::new(&[3], &arena);
        let mut color = Color::Red;
        assert_eq!(
            reader.primitive(&mut color).unwrap_err(),
            SerializerError::InvalidEnum { name: "Color", value: 3 }
        );

        let mut reader = Reader::new(&[2], &arena);
        let mut flag = false;
        assert_eq!(reader.primitive(&mut flag).unwrap_err(), SerializerError::InvalidBool(2));
    }

    #[test]
    fn missing_terminator() {
        let arena = Arena::new();
        let mut reader = Reader::new(&[2, 0, 0, 0, b'h', b'i'], &arena);
        let mut value = None;

        assert_eq!(
            reader.string(&mut value).unwrap_err(),
            SerializerError::MissingTerminator
        );
    }

    #[test]
    fn huge_count_rejected() {
        let arena = Arena::new();
        let mut reader = Reader::new(&[0xff, 0xff, 0xff, 0x7f, 0], &arena);
        let mut weights: &[u16] = &[];

        assert!(matches!(
            reader.raw_array(&mut weights),
            Err(SerializerError::CountOverflow { .. })
        ));
    }

    mod local_result {
        // A crate-local single parameter alias must not leak into the macro
        type Result<T> = std::result::Result<T, std::fmt::Error>;

        primitive_enum! {
            pub enum Mode: u16 {
                Off = 0,
                On = 7,
            }
        }

        pub fn decode(src: &[u8]) -> Result<Option<Mode>> {
            Ok(<Mode as crate::serializer::Primitive>::decode(src).ok())
        }
    }

    #[test]
    fn enum_with_shadowed_result() {
        assert_eq!(local_result::decode(&[7, 0]).unwrap(), Some(local_result::Mode::On));
        assert_eq!(local_result::decode(&[1, 0]).unwrap(), None);
    }
}
