use crate::crypto::{AesKey, AesXtsKey, KeyParseError, TitleKey};
use crate::ids::{IdParseError, RightsId};
use binrw::{BinRead, BinWrite};
use ini::Properties;
use snafu::{ResultExt, Snafu};
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Selects which on-disk keyfile a [`KeySet`] was loaded from: `prod.keys`
/// for retail consoles, `dev.keys` for devkits. Both use the same file
/// format; only the key material differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySetPreset {
    Retail,
    Dev,
}

impl Default for KeySetPreset {
    fn default() -> Self {
        Self::Retail
    }
}

#[derive(Clone)]
pub struct KeySet {
    // I don't want to deal with all key derivation machinery right now, so I'll just add the keys I need for now.
    preset: KeySetPreset,
    header_key: Option<AesXtsKey>,
    title_kek: [Option<AesKey>; 0x10],
    key_area_key_application: [Option<AesKey>; 0x20],
    key_area_key_ocean: [Option<AesKey>; 0x20],
    key_area_key_system: [Option<AesKey>; 0x20],
    nca_header_fixed_modulus: Option<[u8; 0x100]>,
    acid_fixed_modulus: Option<[u8; 0x100]>,
    title_keys: HashMap<RightsId, TitleKey>,
}

pub struct KeyName {
    pub key_name: &'static str,
    pub index: Option<u8>,
}

impl Debug for KeyName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(index) = self.index {
            write!(f, "{}_{:02x}", self.key_name, index)
        } else {
            write!(f, "{}", self.key_name)
        }
    }
}

impl Display for KeyName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

#[derive(Snafu, Debug)]
pub struct MissingKeyError {
    pub key_name: KeyName,
}

#[derive(Snafu, Debug)]
pub enum KeySetParseError {
    #[snafu(display("Could not parse keyset file at line {} column {}: {}", line, col, msg))]
    CommonKeysFileParse {
        line: usize,
        col: usize,
        msg: String,
    },
    #[snafu(display(
        "Could not parse title keys file at line {} column {}: {}",
        line,
        col,
        msg
    ))]
    TitleKeysFileParse {
        line: usize,
        col: usize,
        msg: String,
    },

    #[snafu(display("Could not parse key {}: {}", key_name, source))]
    KeyParse {
        key_name: KeyName,
        source: KeyParseError,
    },
    #[snafu(display("Could not parse rightsid {}: {}", rights_id, source))]
    RightsIdParse {
        rights_id: String,
        source: IdParseError,
    },
    #[snafu(display("Could not parse title key for rightsid {:?}: {}", rights_id, source))]
    TitleKeyParse {
        rights_id: RightsId,
        source: KeyParseError,
    },
}

#[derive(Snafu, Debug)]
pub enum SystemKeysetError {
    Parse { source: KeySetParseError },
    NotFound { tried: Vec<PathBuf> },
    Io { source: std::io::Error },
}

#[derive(Snafu, Debug)]
#[snafu(display("Missing title key for RightsId {}", rights_id))]
pub struct MissingTitleKeyError {
    pub rights_id: RightsId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum KeyAreaKeyIndex {
    Application = 0,
    Ocean = 1,
    System = 2,
}

impl KeySet {
    /// Loads the retail keyset (`prod.keys`) from the conventional system
    /// locations. See [`KeySet::from_system`].
    pub fn retail(keys_dir: Option<&Path>) -> Result<Self, SystemKeysetError> {
        Self::from_system(keys_dir, KeySetPreset::Retail)
    }

    /// Loads the devkit keyset (`dev.keys`) from the conventional system
    /// locations. See [`KeySet::from_system`].
    pub fn dev(keys_dir: Option<&Path>) -> Result<Self, SystemKeysetError> {
        Self::from_system(keys_dir, KeySetPreset::Dev)
    }

    /// Loads a keyset from a file. The file format is the same as the one used by Hactool.
    /// By default the file is searched in the ".switch" dir in
    ///     the user's home directory and in "switch" in user's config directory (according to `dirs-next` crate).
    ///
    /// One can also provide a path to a custom keyset file, then the system directories are ignored.
    /// `preset` selects whether `prod.keys` or `dev.keys` is the file name searched for.
    pub fn from_system(
        keys_dir: Option<&Path>,
        preset: KeySetPreset,
    ) -> Result<Self, SystemKeysetError> {
        let paths = if let Some(key_path) = keys_dir {
            vec![Some(key_path.into())]
        } else {
            vec![
                dirs_next::config_dir().map(|v| v.join("switch")),
                dirs_next::home_dir().map(|v| v.join(".switch")),
            ]
        }
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

        let find_file = |file_name: &str| -> Result<PathBuf, SystemKeysetError> {
            for path in &paths {
                let file_path = path.join(file_name);
                if file_path.exists() {
                    return Ok(file_path);
                }
            }

            Err(SystemKeysetError::NotFound {
                tried: paths
                    .clone()
                    .into_iter()
                    .map(|p| p.join(file_name))
                    .collect(),
            })
        };

        let keys_file_name = match preset {
            KeySetPreset::Retail => "prod.keys",
            KeySetPreset::Dev => "dev.keys",
        };

        let common_keys_path = find_file(keys_file_name)?;
        let title_keys_path = find_file("title.keys").ok();

        let common_keys = std::fs::read_to_string(&common_keys_path).context(IoSnafu)?;
        let title_keys = title_keys_path
            .as_ref()
            .map(|p| std::fs::read_to_string(p).context(IoSnafu))
            .transpose()?;

        Self::from_file_contents(preset, &common_keys, title_keys.as_deref().unwrap_or(""))
            .context(ParseSnafu {})
    }

    pub fn from_file_contents(
        preset: KeySetPreset,
        common_keys: &str,
        title_keys: &str,
    ) -> Result<Self, KeySetParseError> {
        let common_keys = ini::Ini::load_from_str_noescape(common_keys).map_err(|e| {
            KeySetParseError::CommonKeysFileParse {
                line: e.line,
                col: e.col,
                msg: e.msg,
            }
        })?;
        let common_keys = common_keys.general_section();

        fn parse_key<K: FromStr<Err = KeyParseError>>(
            props: &Properties,
            name: &'static str,
        ) -> Result<Option<K>, KeySetParseError> {
            props
                .get(name)
                .map(|s| s.parse())
                .transpose()
                .map_err(|source| KeySetParseError::KeyParse {
                    key_name: KeyName {
                        key_name: name,
                        index: None,
                    },
                    source,
                })
        }

        fn parse_keys<K: FromStr<Err = KeyParseError> + Copy, const N: usize>(
            props: &Properties,
            name: &'static str,
        ) -> Result<[Option<K>; N], KeySetParseError> {
            let mut result = [None; N];
            for (i, result) in result.iter_mut().enumerate() {
                let key_name = KeyName {
                    key_name: name,
                    index: Some(i as u8),
                };
                let key = props
                    .get(&key_name.to_string())
                    .map(|s| s.parse())
                    .transpose()
                    .map_err(|source| KeySetParseError::KeyParse { key_name, source })?;
                *result = key;
            }
            Ok(result)
        }

        let title_keys_ini = ini::Ini::load_from_str_noescape(title_keys).map_err(|e| {
            KeySetParseError::TitleKeysFileParse {
                line: e.line,
                col: e.col,
                msg: e.msg,
            }
        })?;

        let mut title_keys = HashMap::new();
        for (rights_id, title_key) in title_keys_ini.general_section().iter() {
            let rights_id = rights_id.parse().context(RightsIdParseSnafu {
                rights_id: rights_id.to_string(),
            })?;
            let title_key = title_key
                .parse()
                .context(TitleKeyParseSnafu { rights_id })?;
            title_keys.insert(rights_id, title_key);
        }

        fn parse_modulus(
            props: &Properties,
            name: &'static str,
        ) -> Result<Option<[u8; 0x100]>, KeySetParseError> {
            props
                .get(name)
                .map(|s| -> Result<[u8; 0x100], KeySetParseError> {
                    let mut result = [0u8; 0x100];
                    hex::decode_to_slice(s, &mut result).map_err(|_| {
                        KeySetParseError::KeyParse {
                            key_name: KeyName {
                                key_name: name,
                                index: None,
                            },
                            source: KeyParseError::InvalidLength {
                                expected: 0x200,
                                actual: s.len(),
                            },
                        }
                    })?;
                    Ok(result)
                })
                .transpose()
        }

        let nca_header_fixed_modulus = parse_modulus(common_keys, "nca_header_fixed_key_modulus")?;
        let acid_fixed_modulus = parse_modulus(common_keys, "acid_fixed_key_modulus")?;

        Ok(Self {
            preset,
            header_key: parse_key(common_keys, "header_key")?,
            title_kek: parse_keys(common_keys, "titlekek")?,
            key_area_key_application: parse_keys(common_keys, "key_area_key_application")?,
            key_area_key_ocean: parse_keys(common_keys, "key_area_key_ocean")?,
            key_area_key_system: parse_keys(common_keys, "key_area_key_system")?,
            nca_header_fixed_modulus,
            acid_fixed_modulus,
            title_keys,
        })
    }
}

impl KeySet {
    pub fn header_key(&self) -> Result<AesXtsKey, MissingKeyError> {
        self.header_key.ok_or(MissingKeyError {
            key_name: KeyName {
                key_name: "header_key",
                index: None,
            },
        })
    }

    pub fn preset(&self) -> KeySetPreset {
        self.preset
    }

    pub fn fixed_modulus(&self) -> Result<[u8; 0x100], MissingKeyError> {
        self.nca_header_fixed_modulus.ok_or(MissingKeyError {
            key_name: KeyName {
                key_name: "nca_header_fixed_key_modulus",
                index: None,
            },
        })
    }

    pub fn acid_fixed_modulus(&self) -> Result<[u8; 0x100], MissingKeyError> {
        self.acid_fixed_modulus.ok_or(MissingKeyError {
            key_name: KeyName {
                key_name: "acid_fixed_key_modulus",
                index: None,
            },
        })
    }

    pub fn title_kek(&self, master_key_revision: u8) -> Result<AesKey, MissingKeyError> {
        self.title_kek[master_key_revision as usize].ok_or(MissingKeyError {
            key_name: KeyName {
                key_name: "title_kek",
                index: Some(master_key_revision),
            },
        })
    }

    pub fn key_area_key(
        &self,
        master_key_revision: u8,
        key_area_key_index: KeyAreaKeyIndex,
    ) -> Result<AesKey, MissingKeyError> {
        let (kek_array, name) = match key_area_key_index {
            KeyAreaKeyIndex::Application => {
                (&self.key_area_key_application, "key_area_key_application")
            }
            KeyAreaKeyIndex::Ocean => (&self.key_area_key_ocean, "key_area_key_ocean"),
            KeyAreaKeyIndex::System => (&self.key_area_key_system, "key_area_key_system"),
        };
        kek_array[master_key_revision as usize].ok_or(MissingKeyError {
            key_name: KeyName {
                key_name: name,
                index: Some(master_key_revision),
            },
        })
    }

    pub fn title_key(&self, rights_id: &RightsId) -> Result<TitleKey, MissingTitleKeyError> {
        self.title_keys
            .get(rights_id)
            .copied()
            .ok_or(MissingTitleKeyError {
                rights_id: *rights_id,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMON_KEYS: &str = "\
header_key = 000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f
titlekek_00 = 101112131415161718191a1b1c1d1e1f
key_area_key_application_00 = 202122232425262728292a2b2c2d2e2f
";

    const TITLE_KEYS: &str = "\
00112233445566778899aabbccddeeff = 303132333435363738393a3b3c3d3e3f
";

    #[test]
    fn parses_common_and_title_keys() {
        let keyset =
            KeySet::from_file_contents(KeySetPreset::Retail, COMMON_KEYS, TITLE_KEYS).unwrap();

        assert!(keyset.header_key().is_ok());
        assert!(keyset.title_kek(0).is_ok());
        assert!(keyset
            .key_area_key(0, KeyAreaKeyIndex::Application)
            .is_ok());

        let rights_id: RightsId = "00112233445566778899aabbccddeeff".parse().unwrap();
        assert!(keyset.title_key(&rights_id).is_ok());
    }

    #[test]
    fn missing_key_is_reported_by_name() {
        let keyset = KeySet::from_file_contents(KeySetPreset::Retail, "", "").unwrap();

        let err = keyset.header_key().unwrap_err();
        assert_eq!(err.key_name.key_name, "header_key");

        let err = keyset.title_kek(5).unwrap_err();
        assert_eq!(err.key_name.index, Some(5));
    }

    #[test]
    fn unknown_rights_id_is_missing() {
        let keyset = KeySet::from_file_contents(KeySetPreset::Retail, "", "").unwrap();
        let rights_id: RightsId = "00000000000000000000000000000000".parse().unwrap();
        assert!(keyset.title_key(&rights_id).is_err());
    }
}
