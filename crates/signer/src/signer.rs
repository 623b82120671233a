//! Signed, time-limited read links.
//!
//! A link carries its grant in the query string:
//!
//! ```text
//! {endpoint}/{container}/{object}?sv=..&sr=b&sp=r&st=..&se=..&spr=https&sig=..
//! ```
//!
//! `sig` is base64(HMAC-SHA256(key, string-to-sign)), where the string to
//! sign is the newline-joined permission, start, expiry, canonical resource
//! (`/blob/{account}/{container}/{object}`), protocol and version.

use crate::error::{SignerError, SignerResult};
use crate::key::AccountKey;
use base64::Engine;
use hmac::{Hmac, Mac};
use percent_encoding::percent_decode_str;
use sha2::Sha256;
use std::fmt;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Version tag embedded in every link.
pub const SIGNED_VERSION: &str = "2020-02-10";

/// Resource type: a single object.
pub const SIGNED_RESOURCE: &str = "b";

/// Protocol links are restricted to.
pub const SIGNED_PROTOCOL: &str = "https";

/// Timestamp format used in links (`YYYY-MM-DDTHH:MM:SSZ`).
pub const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");

/// What a link allows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    /// Read the object.
    Read,
}

impl Permission {
    /// Single-letter form used in links.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "r",
        }
    }

    /// Parse the single-letter form.
    pub fn parse(s: &str) -> SignerResult<Self> {
        match s {
            "r" => Ok(Self::Read),
            other => Err(SignerError::InvalidLink(format!(
                "unsupported permission: {other}"
            ))),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A granted permission on one object for a bounded time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessGrant {
    /// Account the object belongs to.
    pub account: String,
    /// Container holding the object.
    pub container: String,
    /// Object name inside the container.
    pub object: String,
    /// Permission granted.
    pub permission: Permission,
    /// Start of validity (issuance time).
    pub start: OffsetDateTime,
    /// End of validity.
    pub expiry: OffsetDateTime,
    /// Signature over the fields above.
    pub signature: String,
}

impl AccessGrant {
    /// `/blob/{account}/{container}/{object}`
    pub fn canonical_resource(&self) -> String {
        canonical_resource(&self.account, &self.container, &self.object)
    }

    /// Validity window length.
    pub fn ttl(&self) -> Duration {
        self.expiry - self.start
    }
}

/// An issued link.
#[derive(Clone, Debug)]
pub struct SignedLink {
    /// The full URL handed to clients.
    pub url: Url,
    /// The grant the URL encodes.
    pub grant: AccessGrant,
}

impl SignedLink {
    /// When the link stops working.
    pub fn expires_at(&self) -> OffsetDateTime {
        self.grant.expiry
    }
}

/// Issues and verifies read links with a shared account key.
pub struct LinkSigner {
    account: String,
    endpoint: Url,
    key: AccountKey,
}

impl LinkSigner {
    /// Create a signer for `account` serving objects from `endpoint`.
    pub fn new(account: impl Into<String>, endpoint: &str, key: AccountKey) -> SignerResult<Self> {
        let account = account.into();
        if account.is_empty() {
            return Err(SignerError::InvalidEndpoint("account is empty".to_string()));
        }

        let endpoint = Url::parse(endpoint)
            .map_err(|e| SignerError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") || endpoint.cannot_be_a_base() {
            return Err(SignerError::InvalidEndpoint(format!(
                "expected an http(s) base URL: {endpoint}"
            )));
        }
        if endpoint.query().is_some() || endpoint.fragment().is_some() {
            return Err(SignerError::InvalidEndpoint(format!(
                "endpoint must not carry a query or fragment: {endpoint}"
            )));
        }

        Ok(Self {
            account,
            endpoint,
            key,
        })
    }

    /// Account name links are signed for.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Issue a read link valid from now for `ttl`.
    pub fn issue_read_link(
        &self,
        container: &str,
        object: &str,
        ttl: Duration,
    ) -> SignerResult<SignedLink> {
        self.issue_at(container, object, OffsetDateTime::now_utc(), ttl)
    }

    /// Issue a read link valid from `now` for `ttl`.
    ///
    /// `now` is truncated to whole seconds, since that is the resolution
    /// links carry; the expiry is exactly `start + ttl`.
    pub fn issue_at(
        &self,
        container: &str,
        object: &str,
        now: OffsetDateTime,
        ttl: Duration,
    ) -> SignerResult<SignedLink> {
        if ttl <= Duration::ZERO {
            return Err(SignerError::InvalidTtl(format!("{ttl} is not positive")));
        }
        if ttl.subsec_nanoseconds() != 0 {
            return Err(SignerError::InvalidTtl(format!(
                "{ttl} is not a whole number of seconds"
            )));
        }
        if container.is_empty() || container.contains('/') {
            return Err(SignerError::InvalidObject(format!(
                "container must be a single path segment: {container:?}"
            )));
        }
        cask_core::upload::validate_object_name(object)
            .map_err(|e| SignerError::InvalidObject(e.to_string()))?;

        let start = now
            .to_offset(time::UtcOffset::UTC)
            .replace_nanosecond(0)
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        let expiry = start
            .checked_add(ttl)
            .ok_or_else(|| SignerError::InvalidTtl(format!("{ttl} overflows the expiry")))?;

        let mut grant = AccessGrant {
            account: self.account.clone(),
            container: container.to_string(),
            object: object.to_string(),
            permission: Permission::Read,
            start,
            expiry,
            signature: String::new(),
        };
        grant.signature = self.sign(&grant)?;

        let url = self.to_url(&grant)?;
        Ok(SignedLink { url, grant })
    }

    /// Check a link issued by this signer.
    ///
    /// The signature is compared in constant time. Returns the grant the link
    /// carries if it is authentic and `now` falls inside its window.
    pub fn verify(&self, link: &Url, now: OffsetDateTime) -> SignerResult<AccessGrant> {
        let (container, object) = self.split_path(link)?;

        let mut params = QueryParams::default();
        for (name, value) in link.query_pairs() {
            params.set(&name, value.into_owned());
        }

        let version = params.require("sv", params.version.as_deref())?;
        if version != SIGNED_VERSION {
            return Err(SignerError::InvalidLink(format!(
                "unsupported version: {version}"
            )));
        }
        let resource = params.require("sr", params.resource.as_deref())?;
        if resource != SIGNED_RESOURCE {
            return Err(SignerError::InvalidLink(format!(
                "unsupported resource type: {resource}"
            )));
        }
        let protocol = params.require("spr", params.protocol.as_deref())?;
        if protocol != SIGNED_PROTOCOL {
            return Err(SignerError::InvalidLink(format!(
                "unsupported protocol: {protocol}"
            )));
        }

        let permission = Permission::parse(params.require("sp", params.permission.as_deref())?)?;
        let start = parse_timestamp(params.require("st", params.start.as_deref())?)?;
        let expiry = parse_timestamp(params.require("se", params.expiry.as_deref())?)?;
        let signature = params.require("sig", params.signature.as_deref())?;

        let grant = AccessGrant {
            account: self.account.clone(),
            container,
            object,
            permission,
            start,
            expiry,
            signature: signature.to_string(),
        };

        let provided = base64::engine::general_purpose::STANDARD
            .decode(signature)
            .map_err(|_| SignerError::VerificationFailed)?;
        self.mac_for(&grant)?
            .verify_slice(&provided)
            .map_err(|_| SignerError::VerificationFailed)?;

        if now < grant.start {
            return Err(SignerError::NotYetValid {
                start: format_timestamp(grant.start)?,
            });
        }
        if now >= grant.expiry {
            return Err(SignerError::Expired {
                expiry: format_timestamp(grant.expiry)?,
            });
        }

        Ok(grant)
    }

    fn mac_for(&self, grant: &AccessGrant) -> SignerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.key.as_bytes())
            .map_err(|e| SignerError::Signing(format!("invalid key: {e}")))?;
        mac.update(string_to_sign(grant)?.as_bytes());
        Ok(mac)
    }

    fn sign(&self, grant: &AccessGrant) -> SignerResult<String> {
        let digest = self.mac_for(grant)?.finalize().into_bytes();
        Ok(base64::engine::general_purpose::STANDARD.encode(digest))
    }

    fn to_url(&self, grant: &AccessGrant) -> SignerResult<Url> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SignerError::InvalidEndpoint(self.endpoint.to_string()))?;
            segments.pop_if_empty();
            segments.push(&grant.container);
            segments.extend(grant.object.split('/'));
        }

        let start = format_timestamp(grant.start)?;
        let expiry = format_timestamp(grant.expiry)?;
        url.query_pairs_mut()
            .append_pair("sv", SIGNED_VERSION)
            .append_pair("sr", SIGNED_RESOURCE)
            .append_pair("sp", grant.permission.as_str())
            .append_pair("st", &start)
            .append_pair("se", &expiry)
            .append_pair("spr", SIGNED_PROTOCOL)
            .append_pair("sig", &grant.signature);
        Ok(url)
    }

    /// Split a link path into (container, object), relative to the endpoint.
    fn split_path(&self, link: &Url) -> SignerResult<(String, String)> {
        if link.origin() != self.endpoint.origin() {
            return Err(SignerError::InvalidLink(format!(
                "link is not for {}",
                self.endpoint
            )));
        }

        let base: Vec<&str> = self
            .endpoint
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        let mut segments = link
            .path_segments()
            .ok_or_else(|| SignerError::InvalidLink("link has no path".to_string()))?;

        for expected in &base {
            if segments.next() != Some(*expected) {
                return Err(SignerError::InvalidLink(
                    "link path is outside the endpoint".to_string(),
                ));
            }
        }

        let decoded = segments
            .map(|seg| {
                percent_decode_str(seg)
                    .decode_utf8()
                    .map(|s| s.into_owned())
                    .map_err(|e| SignerError::InvalidLink(format!("path is not UTF-8: {e}")))
            })
            .collect::<SignerResult<Vec<String>>>()?;

        match decoded.split_first() {
            Some((container, object)) if !object.is_empty() => {
                Ok((container.clone(), object.join("/")))
            }
            _ => Err(SignerError::InvalidLink(
                "link does not name an object".to_string(),
            )),
        }
    }
}

#[derive(Default)]
struct QueryParams {
    version: Option<String>,
    resource: Option<String>,
    permission: Option<String>,
    start: Option<String>,
    expiry: Option<String>,
    protocol: Option<String>,
    signature: Option<String>,
}

impl QueryParams {
    fn set(&mut self, name: &str, value: String) {
        let slot = match name {
            "sv" => &mut self.version,
            "sr" => &mut self.resource,
            "sp" => &mut self.permission,
            "st" => &mut self.start,
            "se" => &mut self.expiry,
            "spr" => &mut self.protocol,
            "sig" => &mut self.signature,
            _ => return,
        };
        *slot = Some(value);
    }

    fn require<'a>(&self, name: &'static str, value: Option<&'a str>) -> SignerResult<&'a str> {
        value.ok_or(SignerError::MissingParameter(name))
    }
}

fn canonical_resource(account: &str, container: &str, object: &str) -> String {
    format!("/blob/{account}/{container}/{object}")
}

fn string_to_sign(grant: &AccessGrant) -> SignerResult<String> {
    let start = format_timestamp(grant.start)?;
    let expiry = format_timestamp(grant.expiry)?;
    let resource = grant.canonical_resource();
    Ok([
        grant.permission.as_str(),
        start.as_str(),
        expiry.as_str(),
        resource.as_str(),
        SIGNED_PROTOCOL,
        SIGNED_VERSION,
    ]
    .join("\n"))
}

/// Format a timestamp the way links carry it.
pub fn format_timestamp(ts: OffsetDateTime) -> SignerResult<String> {
    ts.to_offset(time::UtcOffset::UTC)
        .format(TIMESTAMP_FORMAT)
        .map_err(|e| SignerError::Signing(format!("failed to format timestamp: {e}")))
}

fn parse_timestamp(s: &str) -> SignerResult<OffsetDateTime> {
    PrimitiveDateTime::parse(s, TIMESTAMP_FORMAT)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|e| SignerError::InvalidLink(format!("bad timestamp {s:?}: {e}")))
}
