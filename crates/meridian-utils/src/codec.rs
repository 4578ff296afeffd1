use anyhow::Result;
use bincode::Options;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[inline]
pub fn encode<T>(value: &T) -> Result<Bytes>
where
    T: Serialize + ?Sized,
{
    bincode::DefaultOptions::new().serialize(value).map(Bytes::from).map_err(From::from)
}

#[inline]
pub fn decode<T>(bytes: &[u8]) -> Result<T>
where
    T: DeserializeOwned,
{
    bincode::DefaultOptions::new().deserialize(bytes).map_err(From::from)
}

#[inline]
pub fn encoded_len<T>(value: &T) -> Result<u64>
where
    T: Serialize,
{
    bincode::DefaultOptions::new().serialized_size(value).map_err(From::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let value = (42u64, "scope".to_owned(), vec![1u8, 2, 3]);
        let bytes = encode(&value).unwrap();
        assert_eq!(bytes.len() as u64, encoded_len(&value).unwrap());
        let decoded: (u64, String, Vec<u8>) = decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }
}
