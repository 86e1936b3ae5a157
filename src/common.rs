use std::cmp::Ordering;
use std::fmt;

/// The Epoch-Version-Release triple of an RPM.
///
/// Epoch overrides all other fields and is generally only used when a change
/// to the versioning scheme would otherwise make a newer package sort as
/// older. An absent epoch compares equal to "0".
#[derive(Clone, Debug, Default, Eq, Hash)]
pub struct EVR {
    pub epoch: String,
    pub version: String,
    pub release: String,
}

impl EVR {
    pub fn new<T: Into<String>>(epoch: T, version: T, release: T) -> EVR {
        EVR {
            epoch: epoch.into(),
            version: version.into(),
            release: release.into(),
        }
    }

    pub fn epoch(&self) -> &str {
        &self.epoch
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn release(&self) -> &str {
        &self.release
    }

    pub fn values(&self) -> (&str, &str, &str) {
        (&self.epoch, &self.version, &self.release)
    }

    /// Split an "e:v-r" string into its parts. Both epoch and release may be
    /// absent; the separators themselves are never part of a value.
    pub fn parse_values(evr: &str) -> (&str, &str, &str) {
        let (epoch, vr) = evr.split_once(':').unwrap_or(evr.split_at(0));
        let (version, release) = vr.split_once('-').unwrap_or((vr, ""));

        (epoch, version, release)
    }

    pub fn parse(evr: &str) -> Self {
        let (e, v, r) = EVR::parse_values(evr);
        EVR::new(e, v, r)
    }
}

impl PartialEq for EVR {
    fn eq(&self, other: &Self) -> bool {
        ((self.epoch == other.epoch)
            || (self.epoch.is_empty() && other.epoch == "0")
            || (self.epoch == "0" && other.epoch.is_empty()))
            && self.version == other.version
            && self.release == other.release
    }
}

impl fmt::Display for EVR {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.epoch.is_empty() {
            write!(f, "{}:", self.epoch)?;
        }

        write!(f, "{}-{}", self.version, self.release)
    }
}

impl PartialOrd for EVR {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EVR {
    fn cmp(&self, other: &Self) -> Ordering {
        let epoch_1 = if self.epoch.is_empty() {
            "0"
        } else {
            &self.epoch
        };
        let epoch_2 = if other.epoch.is_empty() {
            "0"
        } else {
            &other.epoch
        };

        compare_version_string(epoch_1, epoch_2)
            .then_with(|| compare_version_string(&self.version, &other.version))
            .then_with(|| compare_version_string(&self.release, &other.release))
    }
}

/// Compare two version components the way librpm does: alternating runs of
/// digits and letters, with `~` sorting lower and `^` sorting higher than
/// end-of-string.
pub(crate) fn compare_version_string(version1: &str, version2: &str) -> Ordering {
    if version1 == version2 {
        return Ordering::Equal;
    }

    let mut v1 = version1;
    let mut v2 = version2;

    let separator = |c: char| !c.is_ascii_alphanumeric() && c != '~' && c != '^';

    loop {
        v1 = v1.trim_start_matches(separator);
        v2 = v2.trim_start_matches(separator);

        // Tilde sorts as older, even against an empty string
        match (v1.strip_prefix('~'), v2.strip_prefix('~')) {
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (Some(a), Some(b)) => {
                v1 = a;
                v2 = b;
                continue;
            }
            _ => (),
        }

        // Caret sorts as newer against end-of-string, older otherwise
        match (v1.strip_prefix('^'), v2.strip_prefix('^')) {
            (Some(_), None) => {
                return if v2.is_empty() {
                    Ordering::Greater
                } else {
                    Ordering::Less
                };
            }
            (None, Some(_)) => {
                return if v1.is_empty() {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
            }
            (Some(a), Some(b)) => {
                v1 = a;
                v2 = b;
                continue;
            }
            _ => (),
        }

        if v1.is_empty() || v2.is_empty() {
            break;
        }

        fn leading_run<F>(string: &str, pat: F) -> Option<(&str, &str)>
        where
            F: Fn(char) -> bool,
        {
            let end = string.find(|c| !pat(c)).unwrap_or(string.len());
            if end == 0 {
                None
            } else {
                Some(string.split_at(end))
            }
        }

        if v1.starts_with(|c: char| c.is_ascii_digit()) {
            match (
                leading_run(v1, |c| c.is_ascii_digit()),
                leading_run(v2, |c| c.is_ascii_digit()),
            ) {
                (Some((run1, rest1)), Some((run2, rest2))) => {
                    v1 = rest1;
                    v2 = rest2;
                    // More significant digits wins, then lexical comparison
                    let run1 = run1.trim_start_matches('0');
                    let run2 = run2.trim_start_matches('0');
                    let ordering = run1.len().cmp(&run2.len()).then_with(|| run1.cmp(run2));
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                // Numeric segment beats alphabetic segment
                (Some(_), None) => return Ordering::Greater,
                _ => unreachable!(),
            }
        } else {
            match (
                leading_run(v1, |c| c.is_ascii_alphabetic()),
                leading_run(v2, |c| c.is_ascii_alphabetic()),
            ) {
                (Some((run1, rest1)), Some((run2, rest2))) => {
                    v1 = rest1;
                    v2 = rest2;
                    let ordering = run1.cmp(run2);
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                (Some(_), None) => return Ordering::Less,
                _ => unreachable!(),
            }
        }
    }

    if v1.is_empty() && v2.is_empty() {
        return Ordering::Equal;
    }

    v1.len().cmp(&v2.len())
}

/// Compare two strings as RPM EVR values
pub fn rpmvercmp(evr1: &str, evr2: &str) -> Ordering {
    EVR::parse(evr1).cmp(&EVR::parse(evr2))
}
