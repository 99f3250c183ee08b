// Copyright 2019 The Kestrel Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Serialization and deserialization layer specialized for the binary
//! consensus encoding (little-endian integers, compact-size prefixed
//! collections). Ensures consistency between what goes on the wire, in
//! the store and under the hashers.
//!
//! To use it simply implement `Writeable` or `Readable` and then use the
//! `serialize` or `deserialize` functions on them as appropriate.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// The maximum size in bytes we are willing to read in one variable
/// length chunk. Set comfortably above the largest consensus object.
const MAX_READ_BYTES: u64 = 8_000_000;

/// Possible errors deriving from serializing or deserializing.
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum Error {
	/// Wraps an io error produced when reading or writing
	#[fail(display = "serialization i/o error: {:?}", _0)]
	IOErr(io::ErrorKind),
	/// Expected a given value that wasn't found
	#[fail(display = "unexpected data, expected {:?}, got {:?}", expected, received)]
	UnexpectedData {
		/// What we wanted
		expected: Vec<u8>,
		/// What we got
		received: Vec<u8>,
	},
	/// Data wasn't in a consumable format
	#[fail(display = "corrupted data")]
	CorruptedData,
	/// When asked to read too much data
	#[fail(display = "too large read: {}", _0)]
	TooLargeReadErr(u64),
	/// A varint that should have used a smaller encoding
	#[fail(display = "non canonical varint")]
	NonCanonicalVarInt,
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::IOErr(e.kind())
	}
}

/// Implementations defined how different numbers and binary structures are
/// written to an underlying stream or container (depending on implementation).
pub trait Writer {
	/// Writes a u8 as bytes
	fn write_u8(&mut self, n: u8) -> Result<(), Error>;
	/// Writes a u16 as little-endian bytes
	fn write_u16(&mut self, n: u16) -> Result<(), Error>;
	/// Writes a u32 as little-endian bytes
	fn write_u32(&mut self, n: u32) -> Result<(), Error>;
	/// Writes a u64 as little-endian bytes
	fn write_u64(&mut self, n: u64) -> Result<(), Error>;
	/// Writes a i32 as little-endian bytes
	fn write_i32(&mut self, n: i32) -> Result<(), Error>;
	/// Writes a i64 as little-endian bytes
	fn write_i64(&mut self, n: i64) -> Result<(), Error>;
	/// Writes a compact-size integer
	fn write_varint(&mut self, n: u64) -> Result<(), Error>;
	/// Writes a fixed number of bytes. The reader is expected to know
	/// the actual length on read.
	fn write_fixed_bytes(&mut self, bytes: &[u8]) -> Result<(), Error>;

	/// Writes a variable length byte chunk, compact-size prefixed.
	fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
		self.write_varint(bytes.len() as u64)?;
		self.write_fixed_bytes(bytes)
	}
}

/// Implementations defined how different numbers and binary structures are
/// read from an underlying stream or container (depending on implementation).
pub trait Reader {
	/// Read a u8 from the underlying Read
	fn read_u8(&mut self) -> Result<u8, Error>;
	/// Read a little-endian u16
	fn read_u16(&mut self) -> Result<u16, Error>;
	/// Read a little-endian u32
	fn read_u32(&mut self) -> Result<u32, Error>;
	/// Read a little-endian u64
	fn read_u64(&mut self) -> Result<u64, Error>;
	/// Read a little-endian i32
	fn read_i32(&mut self) -> Result<i32, Error>;
	/// Read a little-endian i64
	fn read_i64(&mut self) -> Result<i64, Error>;
	/// Read a compact-size integer
	fn read_varint(&mut self) -> Result<u64, Error>;
	/// Read a fixed number of bytes from the underlying reader.
	fn read_fixed_bytes(&mut self, length: usize) -> Result<Vec<u8>, Error>;

	/// Read a variable length byte chunk, compact-size prefixed.
	fn read_bytes(&mut self) -> Result<Vec<u8>, Error> {
		let len = self.read_varint()?;
		if len > MAX_READ_BYTES {
			return Err(Error::TooLargeReadErr(len));
		}
		self.read_fixed_bytes(len as usize)
	}

	/// Consumes a byte from the reader, producing an error if it doesn't
	/// have the expected value
	fn expect_u8(&mut self, val: u8) -> Result<u8, Error> {
		let b = self.read_u8()?;
		if b == val {
			Ok(b)
		} else {
			Err(Error::UnexpectedData {
				expected: vec![val],
				received: vec![b],
			})
		}
	}
}

/// Trait that every type that can be serialized as binary must implement.
/// Writes directly to a Writer, a utility type thinly wrapping an
/// underlying Write implementation.
pub trait Writeable {
	/// Write the data held by this Writeable to the provided writer
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error>;
}

/// Trait that every type that can be deserialized from binary must implement.
/// Reads directly to a Reader, a utility type thinly wrapping an
/// underlying Read implementation.
pub trait Readable
where
	Self: Sized,
{
	/// Reads the data necessary to this Readable from the provided reader
	fn read(reader: &mut dyn Reader) -> Result<Self, Error>;
}

impl Writeable for () {
	fn write<W: Writer>(&self, _writer: &mut W) -> Result<(), Error> {
		Ok(())
	}
}

impl Readable for () {
	fn read(_reader: &mut dyn Reader) -> Result<(), Error> {
		Ok(())
	}
}

/// Deserializes a Readable from any std::io::Read implementation.
pub fn deserialize<T: Readable>(source: &mut dyn Read) -> Result<T, Error> {
	let mut reader = BinReader { source };
	T::read(&mut reader)
}

/// Serializes a Writeable into any std::io::Write implementation.
pub fn serialize<W: Writeable>(sink: &mut dyn Write, thing: &W) -> Result<(), Error> {
	let mut writer = BinWriter { sink };
	thing.write(&mut writer)
}

/// Utility function to serialize a writeable directly in memory using a
/// Vec<u8>.
pub fn ser_vec<W: Writeable>(thing: &W) -> Result<Vec<u8>, Error> {
	let mut vec = vec![];
	serialize(&mut vec, thing)?;
	Ok(vec)
}

/// Utility to read a full Writeable's length once serialized.
pub fn ser_size<W: Writeable>(thing: &W) -> usize {
	let mut counter = SizeCounter { total: 0 };
	// writing to a counter cannot fail
	thing.write(&mut counter).unwrap();
	counter.total
}

struct BinReader<'a> {
	source: &'a mut dyn Read,
}

/// Utility wrapper for an underlying byte Reader. Defines higher level methods
/// to read numbers, byte vectors, hashes, etc.
impl<'a> Reader for BinReader<'a> {
	fn read_u8(&mut self) -> Result<u8, Error> {
		self.source.read_u8().map_err(From::from)
	}
	fn read_u16(&mut self) -> Result<u16, Error> {
		self.source.read_u16::<LittleEndian>().map_err(From::from)
	}
	fn read_u32(&mut self) -> Result<u32, Error> {
		self.source.read_u32::<LittleEndian>().map_err(From::from)
	}
	fn read_u64(&mut self) -> Result<u64, Error> {
		self.source.read_u64::<LittleEndian>().map_err(From::from)
	}
	fn read_i32(&mut self) -> Result<i32, Error> {
		self.source.read_i32::<LittleEndian>().map_err(From::from)
	}
	fn read_i64(&mut self) -> Result<i64, Error> {
		self.source.read_i64::<LittleEndian>().map_err(From::from)
	}
	fn read_varint(&mut self) -> Result<u64, Error> {
		let flag = self.read_u8()?;
		let value = match flag {
			0xff => {
				let v = self.read_u64()?;
				if v < 0x1_0000_0000 {
					return Err(Error::NonCanonicalVarInt);
				}
				v
			}
			0xfe => {
				let v = self.read_u32()? as u64;
				if v < 0x1_0000 {
					return Err(Error::NonCanonicalVarInt);
				}
				v
			}
			0xfd => {
				let v = self.read_u16()? as u64;
				if v < 0xfd {
					return Err(Error::NonCanonicalVarInt);
				}
				v
			}
			n => n as u64,
		};
		Ok(value)
	}
	fn read_fixed_bytes(&mut self, length: usize) -> Result<Vec<u8>, Error> {
		if length as u64 > MAX_READ_BYTES {
			return Err(Error::TooLargeReadErr(length as u64));
		}
		let mut buf = vec![0; length];
		self.source
			.read_exact(&mut buf)
			.map(move |_| buf)
			.map_err(From::from)
	}
}

/// Utility wrapper for an underlying byte Writer. Defines higher level methods
/// to write numbers, byte vectors, hashes, etc.
pub struct BinWriter<'a> {
	sink: &'a mut dyn Write,
}

impl<'a> BinWriter<'a> {
	/// Wrap a standard Write in a consensus codec writer.
	pub fn new(sink: &'a mut dyn Write) -> BinWriter<'a> {
		BinWriter { sink }
	}
}

impl<'a> Writer for BinWriter<'a> {
	fn write_u8(&mut self, n: u8) -> Result<(), Error> {
		self.sink.write_u8(n).map_err(From::from)
	}
	fn write_u16(&mut self, n: u16) -> Result<(), Error> {
		self.sink.write_u16::<LittleEndian>(n).map_err(From::from)
	}
	fn write_u32(&mut self, n: u32) -> Result<(), Error> {
		self.sink.write_u32::<LittleEndian>(n).map_err(From::from)
	}
	fn write_u64(&mut self, n: u64) -> Result<(), Error> {
		self.sink.write_u64::<LittleEndian>(n).map_err(From::from)
	}
	fn write_i32(&mut self, n: i32) -> Result<(), Error> {
		self.sink.write_i32::<LittleEndian>(n).map_err(From::from)
	}
	fn write_i64(&mut self, n: i64) -> Result<(), Error> {
		self.sink.write_i64::<LittleEndian>(n).map_err(From::from)
	}
	fn write_varint(&mut self, n: u64) -> Result<(), Error> {
		match n {
			0..=0xfc => self.write_u8(n as u8),
			0xfd..=0xffff => {
				self.write_u8(0xfd)?;
				self.write_u16(n as u16)
			}
			0x1_0000..=0xffff_ffff => {
				self.write_u8(0xfe)?;
				self.write_u32(n as u32)
			}
			_ => {
				self.write_u8(0xff)?;
				self.write_u64(n)
			}
		}
	}
	fn write_fixed_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
		self.sink.write_all(bytes).map_err(From::from)
	}
}

/// A writer that simply counts bytes, used for size calculations without
/// allocating the serialized form.
struct SizeCounter {
	total: usize,
}

impl Writer for SizeCounter {
	fn write_u8(&mut self, _n: u8) -> Result<(), Error> {
		self.total += 1;
		Ok(())
	}
	fn write_u16(&mut self, _n: u16) -> Result<(), Error> {
		self.total += 2;
		Ok(())
	}
	fn write_u32(&mut self, _n: u32) -> Result<(), Error> {
		self.total += 4;
		Ok(())
	}
	fn write_u64(&mut self, _n: u64) -> Result<(), Error> {
		self.total += 8;
		Ok(())
	}
	fn write_i32(&mut self, _n: i32) -> Result<(), Error> {
		self.total += 4;
		Ok(())
	}
	fn write_i64(&mut self, _n: i64) -> Result<(), Error> {
		self.total += 8;
		Ok(())
	}
	fn write_varint(&mut self, n: u64) -> Result<(), Error> {
		self.total += match n {
			0..=0xfc => 1,
			0xfd..=0xffff => 3,
			0x1_0000..=0xffff_ffff => 5,
			_ => 9,
		};
		Ok(())
	}
	fn write_fixed_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
		self.total += bytes.len();
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn varint_roundtrip() {
		for n in &[0u64, 1, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, 0x1_0000_0000] {
			let mut vec = vec![];
			{
				let mut writer = BinWriter::new(&mut vec);
				writer.write_varint(*n).unwrap();
			}
			let mut cursor = &vec[..];
			let mut reader = BinReader {
				source: &mut cursor,
			};
			assert_eq!(reader.read_varint().unwrap(), *n);
		}
	}

	#[test]
	fn varint_non_canonical() {
		// 0xfd prefix encoding a value below 0xfd must be rejected
		let data = vec![0xfd, 0x01, 0x00];
		let mut cursor = &data[..];
		let mut reader = BinReader {
			source: &mut cursor,
		};
		assert_eq!(reader.read_varint(), Err(Error::NonCanonicalVarInt));
	}

	#[test]
	fn size_counter_matches_ser() {
		struct Thing;
		impl Writeable for Thing {
			fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
				writer.write_u32(42)?;
				writer.write_bytes(&[1, 2, 3])?;
				writer.write_varint(300)
			}
		}
		let vec = ser_vec(&Thing).unwrap();
		assert_eq!(vec.len(), ser_size(&Thing));
	}
}
