//! S3 XML response builders and parsers

use crate::multipart::{MultipartUpload, PartInfo};
use crate::types::Owner;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Timestamp format S3 uses in XML documents.
const XML_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Escape a string for embedding in XML text content
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn owner_xml(xml: &mut String, indent: &str, tag: &str, owner: &Owner) {
    xml.push_str(&format!("{indent}<{tag}>\n"));
    xml.push_str(&format!("{indent}  <ID>{}</ID>\n", escape_xml(&owner.id)));
    xml.push_str(&format!(
        "{indent}  <DisplayName>{}</DisplayName>\n",
        escape_xml(&owner.display_name)
    ));
    xml.push_str(&format!("{indent}</{tag}>\n"));
}

// ============================================================================
// ListBuckets
// ============================================================================

/// Bucket info for ListBuckets
#[derive(Debug, Clone)]
pub struct BucketInfo {
    pub name: String,
    pub creation_date: DateTime<Utc>,
}

/// ListBuckets response
#[derive(Debug, Clone)]
pub struct ListBucketsResult {
    pub owner: Owner,
    pub buckets: Vec<BucketInfo>,
}

impl ListBucketsResult {
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(r#"<ListAllMyBucketsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#);
        xml.push('\n');

        owner_xml(&mut xml, "  ", "Owner", &self.owner);

        xml.push_str("  <Buckets>\n");
        for bucket in &self.buckets {
            xml.push_str("    <Bucket>\n");
            xml.push_str(&format!(
                "      <Name>{}</Name>\n",
                escape_xml(&bucket.name)
            ));
            xml.push_str(&format!(
                "      <CreationDate>{}</CreationDate>\n",
                bucket.creation_date.format(XML_TIME_FORMAT)
            ));
            xml.push_str("    </Bucket>\n");
        }
        xml.push_str("  </Buckets>\n");

        xml.push_str("</ListAllMyBucketsResult>");
        xml
    }
}

// ============================================================================
// ListObjectsV2
// ============================================================================

/// S3 object in list response
#[derive(Debug, Clone)]
pub struct S3Object {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    /// Quoted ETag, as S3 emits it inside `<ETag>`.
    pub etag: String,
    pub storage_class: String,
}

/// ListObjectsV2 response
#[derive(Debug, Clone)]
pub struct ListBucketResult {
    pub name: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub max_keys: u32,
    pub is_truncated: bool,
    pub contents: Vec<S3Object>,
    pub common_prefixes: Vec<String>,
}

impl ListBucketResult {
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(r#"<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#);
        xml.push('\n');

        xml.push_str(&format!("  <Name>{}</Name>\n", escape_xml(&self.name)));
        xml.push_str(&format!(
            "  <Prefix>{}</Prefix>\n",
            escape_xml(&self.prefix)
        ));
        if let Some(ref delim) = self.delimiter {
            xml.push_str(&format!("  <Delimiter>{}</Delimiter>\n", escape_xml(delim)));
        }
        xml.push_str(&format!("  <MaxKeys>{}</MaxKeys>\n", self.max_keys));
        xml.push_str(&format!(
            "  <KeyCount>{}</KeyCount>\n",
            self.contents.len() + self.common_prefixes.len()
        ));
        xml.push_str(&format!(
            "  <IsTruncated>{}</IsTruncated>\n",
            self.is_truncated
        ));

        for obj in &self.contents {
            xml.push_str("  <Contents>\n");
            xml.push_str(&format!("    <Key>{}</Key>\n", escape_xml(&obj.key)));
            xml.push_str(&format!(
                "    <LastModified>{}</LastModified>\n",
                obj.last_modified.format(XML_TIME_FORMAT)
            ));
            xml.push_str(&format!("    <ETag>{}</ETag>\n", escape_xml(&obj.etag)));
            xml.push_str(&format!("    <Size>{}</Size>\n", obj.size));
            xml.push_str(&format!(
                "    <StorageClass>{}</StorageClass>\n",
                escape_xml(&obj.storage_class)
            ));
            xml.push_str("  </Contents>\n");
        }

        for prefix in &self.common_prefixes {
            xml.push_str("  <CommonPrefixes>\n");
            xml.push_str(&format!("    <Prefix>{}</Prefix>\n", escape_xml(prefix)));
            xml.push_str("  </CommonPrefixes>\n");
        }

        xml.push_str("</ListBucketResult>");
        xml
    }
}

// ============================================================================
// CopyObject / UploadPartCopy
// ============================================================================

/// CopyObject response
#[derive(Debug, Clone)]
pub struct CopyObjectResult {
    /// Quoted ETag.
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

impl CopyObjectResult {
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<CopyObjectResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <ETag>{}</ETag>
  <LastModified>{}</LastModified>
</CopyObjectResult>"#,
            escape_xml(&self.etag),
            self.last_modified.format(XML_TIME_FORMAT)
        )
    }
}

/// UploadPartCopy response
#[derive(Debug, Clone)]
pub struct CopyPartResult {
    /// Quoted ETag of the staged part.
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

impl CopyPartResult {
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<CopyPartResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <ETag>{}</ETag>
  <LastModified>{}</LastModified>
</CopyPartResult>"#,
            escape_xml(&self.etag),
            self.last_modified.format(XML_TIME_FORMAT)
        )
    }
}

// ============================================================================
// Multipart Upload Request/Response
// ============================================================================

/// Part in a CompleteMultipartUpload request
#[derive(Debug, Clone, Deserialize)]
pub struct CompletePart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// CompleteMultipartUpload request body
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteMultipartUploadRequest {
    #[serde(rename = "Part")]
    pub parts: Vec<CompletePart>,
}

impl CompleteMultipartUploadRequest {
    /// Parse from XML body
    pub fn from_xml(xml: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(xml)
    }
}

/// InitiateMultipartUpload response
#[derive(Debug, Clone)]
pub struct InitiateMultipartUploadResult {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

impl InitiateMultipartUploadResult {
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<InitiateMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Bucket>{}</Bucket>
  <Key>{}</Key>
  <UploadId>{}</UploadId>
</InitiateMultipartUploadResult>"#,
            escape_xml(&self.bucket),
            escape_xml(&self.key),
            escape_xml(&self.upload_id),
        )
    }
}

/// CompleteMultipartUpload response
#[derive(Debug, Clone)]
pub struct CompleteMultipartUploadResult {
    pub location: String,
    pub bucket: String,
    pub key: String,
    /// Quoted multipart ETag.
    pub etag: String,
}

impl CompleteMultipartUploadResult {
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<CompleteMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Location>{}</Location>
  <Bucket>{}</Bucket>
  <Key>{}</Key>
  <ETag>{}</ETag>
</CompleteMultipartUploadResult>"#,
            escape_xml(&self.location),
            escape_xml(&self.bucket),
            escape_xml(&self.key),
            escape_xml(&self.etag),
        )
    }
}

/// ListParts response
#[derive(Debug, Clone)]
pub struct ListPartsResult {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub parts: Vec<PartInfo>,
    pub owner: Owner,
    pub max_parts: u32,
    pub is_truncated: bool,
}

impl ListPartsResult {
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(r#"<ListPartsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#);
        xml.push('\n');

        xml.push_str(&format!("  <Bucket>{}</Bucket>\n", escape_xml(&self.bucket)));
        xml.push_str(&format!("  <Key>{}</Key>\n", escape_xml(&self.key)));
        xml.push_str(&format!(
            "  <UploadId>{}</UploadId>\n",
            escape_xml(&self.upload_id)
        ));
        owner_xml(&mut xml, "  ", "Owner", &self.owner);
        owner_xml(&mut xml, "  ", "Initiator", &self.owner);
        xml.push_str("  <StorageClass>STANDARD</StorageClass>\n");
        xml.push_str(&format!("  <MaxParts>{}</MaxParts>\n", self.max_parts));
        xml.push_str(&format!(
            "  <IsTruncated>{}</IsTruncated>\n",
            self.is_truncated
        ));

        for part in &self.parts {
            xml.push_str("  <Part>\n");
            xml.push_str(&format!(
                "    <PartNumber>{}</PartNumber>\n",
                part.part_number
            ));
            xml.push_str(&format!(
                "    <LastModified>{}</LastModified>\n",
                part.last_modified.format(XML_TIME_FORMAT)
            ));
            xml.push_str(&format!(
                "    <ETag>&quot;{}&quot;</ETag>\n",
                escape_xml(&part.etag)
            ));
            xml.push_str(&format!("    <Size>{}</Size>\n", part.size));
            xml.push_str("  </Part>\n");
        }

        xml.push_str("</ListPartsResult>");
        xml
    }
}

/// ListMultipartUploads response
#[derive(Debug, Clone)]
pub struct ListMultipartUploadsResult {
    pub bucket: String,
    pub prefix: String,
    pub uploads: Vec<MultipartUpload>,
    pub max_uploads: u32,
    pub is_truncated: bool,
}

impl ListMultipartUploadsResult {
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(
            r#"<ListMultipartUploadsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#,
        );
        xml.push('\n');

        xml.push_str(&format!("  <Bucket>{}</Bucket>\n", escape_xml(&self.bucket)));
        xml.push_str(&format!("  <Prefix>{}</Prefix>\n", escape_xml(&self.prefix)));
        xml.push_str(&format!(
            "  <MaxUploads>{}</MaxUploads>\n",
            self.max_uploads
        ));
        xml.push_str(&format!(
            "  <IsTruncated>{}</IsTruncated>\n",
            self.is_truncated
        ));

        for upload in &self.uploads {
            xml.push_str("  <Upload>\n");
            xml.push_str(&format!("    <Key>{}</Key>\n", escape_xml(&upload.key)));
            xml.push_str(&format!(
                "    <UploadId>{}</UploadId>\n",
                escape_xml(&upload.upload_id)
            ));
            owner_xml(&mut xml, "    ", "Owner", &upload.owner);
            owner_xml(&mut xml, "    ", "Initiator", &upload.initiator);
            xml.push_str(&format!(
                "    <StorageClass>{}</StorageClass>\n",
                upload.storage_class
            ));
            xml.push_str(&format!(
                "    <Initiated>{}</Initiated>\n",
                upload.initiated.format(XML_TIME_FORMAT)
            ));
            xml.push_str("  </Upload>\n");
        }

        xml.push_str("</ListMultipartUploadsResult>");
        xml
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a&b<c>\"d'"), "a&amp;b&lt;c&gt;&quot;d&apos;");
    }

    #[test]
    fn test_complete_request_from_xml() {
        let xml = r#"<CompleteMultipartUpload>
            <Part><PartNumber>1</PartNumber><ETag>"abc"</ETag></Part>
            <Part><PartNumber>2</PartNumber><ETag>"def"</ETag></Part>
        </CompleteMultipartUpload>"#;
        let req = CompleteMultipartUploadRequest::from_xml(xml).unwrap();
        assert_eq!(req.parts.len(), 2);
        assert_eq!(req.parts[0].part_number, 1);
        assert_eq!(req.parts[1].etag, "\"def\"");
    }

    #[test]
    fn test_complete_request_from_malformed_xml() {
        assert!(CompleteMultipartUploadRequest::from_xml("<oops>").is_err());
    }

    #[test]
    fn test_initiate_result_xml() {
        let xml = InitiateMultipartUploadResult {
            bucket: "b".to_string(),
            key: "path/to/key".to_string(),
            upload_id: "upload-1".to_string(),
        }
        .to_xml();
        assert!(xml.contains("<Bucket>b</Bucket>"));
        assert!(xml.contains("<Key>path/to/key</Key>"));
        assert!(xml.contains("<UploadId>upload-1</UploadId>"));
    }

    #[test]
    fn test_list_parts_xml_quotes_etags() {
        let xml = ListPartsResult {
            bucket: "b".to_string(),
            key: "k".to_string(),
            upload_id: "u".to_string(),
            parts: vec![PartInfo {
                part_number: 1,
                etag: "abc123".to_string(),
                size: 42,
                last_modified: Utc::now(),
            }],
            owner: Owner::default(),
            max_parts: 1000,
            is_truncated: false,
        }
        .to_xml();
        assert!(xml.contains("<PartNumber>1</PartNumber>"));
        assert!(xml.contains("<ETag>&quot;abc123&quot;</ETag>"));
        assert!(xml.contains("<Size>42</Size>"));
    }

    #[test]
    fn test_list_uploads_xml() {
        let xml = ListMultipartUploadsResult {
            bucket: "b".to_string(),
            prefix: String::new(),
            uploads: vec![MultipartUpload {
                key: "k".to_string(),
                upload_id: "u".to_string(),
                owner: Owner::default(),
                initiator: Owner::default(),
                storage_class: Default::default(),
                initiated: Utc::now(),
            }],
            max_uploads: 1000,
            is_truncated: false,
        }
        .to_xml();
        assert!(xml.contains("<UploadId>u</UploadId>"));
        assert!(xml.contains("<StorageClass>STANDARD</StorageClass>"));
    }
}
