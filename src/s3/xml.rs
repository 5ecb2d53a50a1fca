//! XML wire codec
//!
//! Encodes the CompleteMultipartUpload document and decodes the response
//! documents the transfer engine consumes. Element matching uses local names,
//! so the `http://s3.amazonaws.com/doc/2006-03-01/` namespace (default or
//! prefixed) is tolerated.

use crate::s3::error::{Result, S3Error};
use crate::s3::types::{
    CompleteMultipartUploadResult, CompletedPart, ErrorResponse, IncompleteUpload,
    InitiateMultipartUploadResult, Part,
};
use hyper::StatusCode;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt::Write as FmtWrite;

pub const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// One page of ListMultipartUploads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListUploadsPage {
    pub uploads: Vec<IncompleteUpload>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
}

/// One page of ListParts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPartsPage {
    pub parts: Vec<Part>,
    pub is_truncated: bool,
    pub next_part_number_marker: Option<u32>,
}

/// Escape XML special characters into an existing buffer
pub fn xml_escape_into(buf: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '&' => buf.push_str("&amp;"),
            '<' => buf.push_str("&lt;"),
            '>' => buf.push_str("&gt;"),
            '"' => buf.push_str("&quot;"),
            '\'' => buf.push_str("&apos;"),
            _ => buf.push(ch),
        }
    }
}

/// Strip the quote characters the service wraps around ETags
pub fn unquote_etag(etag: &str) -> String {
    etag.trim().trim_matches('"').to_string()
}

/// Build the CompleteMultipartUpload body. Parts are written in the order given.
pub fn encode_complete_multipart_upload(parts: &[CompletedPart]) -> String {
    let mut xml = String::with_capacity(parts.len() * 100 + 128);
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    xml.push_str("<CompleteMultipartUpload xmlns=\"");
    xml.push_str(S3_XMLNS);
    xml.push_str("\">");
    for part in parts {
        xml.push_str("<Part><PartNumber>");
        let _ = write!(xml, "{}", part.part_number);
        xml.push_str("</PartNumber><ETag>\"");
        xml_escape_into(&mut xml, part.etag.trim_matches('"'));
        xml.push_str("\"</ETag></Part>");
    }
    xml.push_str("</CompleteMultipartUpload>");
    xml
}

/// Element boundary seen while walking a document
enum Element<'a> {
    Open(&'a [u8]),
    /// Closing tag; the element's text is passed alongside
    Close(&'a [u8]),
}

/// Walk every element of a document, handing each boundary to `visit`
/// together with the text collected since the last boundary. Returns the root
/// element's local name.
fn walk<F>(status: StatusCode, body: &[u8], mut visit: F) -> Result<String>
where
    F: FnMut(Element<'_>, &mut String) -> std::result::Result<(), String>,
{
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut root: Option<String> = None;
    let mut current_text = String::with_capacity(256);

    loop {
        let step = match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.local_name();
                if root.is_none() {
                    root = Some(String::from_utf8_lossy(name.as_ref()).into_owned());
                }
                current_text.clear();
                visit(Element::Open(name.as_ref()), &mut current_text)
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| S3Error::malformed(status, format!("XML text: {}", err), body))?;
                current_text.push_str(&text);
                Ok(())
            }
            Ok(Event::CData(e)) => {
                current_text.push_str(&String::from_utf8_lossy(&e));
                Ok(())
            }
            Ok(Event::End(e)) => {
                let step = visit(Element::Close(e.local_name().as_ref()), &mut current_text);
                current_text.clear();
                step
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(S3Error::malformed(
                    status,
                    format!("XML parse error: {}", e),
                    body,
                ))
            }
            _ => Ok(()),
        };
        step.map_err(|reason| S3Error::malformed(status, reason, body))?;
    }

    root.ok_or_else(|| S3Error::malformed(status, "empty document", body))
}

/// Decode an `<Error>` document. Returns `None` when the root is anything else
/// or the body is not XML at all.
pub fn parse_error_document(body: &[u8]) -> Option<ErrorResponse> {
    let mut error = ErrorResponse::default();
    let root = walk(StatusCode::OK, body, |element, text| {
        if let Element::Close(name) = element {
            match name {
                b"Code" => error.code = std::mem::take(text),
                b"Message" => error.message = std::mem::take(text),
                b"Resource" => error.resource = Some(std::mem::take(text)),
                b"RequestId" => error.request_id = Some(std::mem::take(text)),
                b"HostId" => error.host_id = Some(std::mem::take(text)),
                b"BucketName" => error.bucket_name = Some(std::mem::take(text)),
                b"Key" => error.key = Some(std::mem::take(text)),
                _ => {}
            }
        }
        Ok(())
    })
    .ok()?;
    (root == "Error").then_some(error)
}

/// Turn a failed response into a `Service` error, using the error document
/// when the body carries one
pub fn service_error(status: StatusCode, body: &[u8]) -> S3Error {
    match parse_error_document(body) {
        Some(error) => S3Error::Service {
            status,
            code: error.code,
            message: error.message,
            resource: error.resource,
            request_id: error.request_id,
        },
        None => S3Error::Service {
            status,
            code: status.canonical_reason().unwrap_or("Unknown").to_string(),
            message: String::from_utf8_lossy(body).into_owned(),
            resource: None,
            request_id: None,
        },
    }
}

fn expect_root(status: StatusCode, body: &[u8], root: &str, expected: &str) -> Result<()> {
    if root == expected {
        return Ok(());
    }
    if root == "Error" {
        return Err(service_error(status, body));
    }
    Err(S3Error::malformed(
        status,
        format!("expected <{}> document, found <{}>", expected, root),
        body,
    ))
}

fn parse_number<T: std::str::FromStr>(field: &str, text: &str) -> std::result::Result<T, String> {
    text.trim()
        .parse()
        .map_err(|_| format!("invalid {} value {:?}", field, text))
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Parse InitiateMultipartUploadResult
pub fn decode_initiate(status: StatusCode, body: &[u8]) -> Result<InitiateMultipartUploadResult> {
    let mut bucket = String::new();
    let mut key = String::new();
    let mut upload_id = String::new();

    let root = walk(status, body, |element, text| {
        if let Element::Close(name) = element {
            match name {
                b"Bucket" => bucket = std::mem::take(text),
                b"Key" => key = std::mem::take(text),
                b"UploadId" => upload_id = std::mem::take(text),
                _ => {}
            }
        }
        Ok(())
    })?;
    expect_root(status, body, &root, "InitiateMultipartUploadResult")?;

    if upload_id.is_empty() {
        return Err(S3Error::malformed(status, "missing UploadId in response", body));
    }

    Ok(InitiateMultipartUploadResult {
        bucket,
        key,
        upload_id,
    })
}

/// Parse CompleteMultipartUploadResult.
///
/// The service may answer 200 and still embed an `<Error>` document; that is
/// reported as a `Service` error.
pub fn decode_complete(status: StatusCode, body: &[u8]) -> Result<CompleteMultipartUploadResult> {
    let mut result = CompleteMultipartUploadResult::default();

    let root = walk(status, body, |element, text| {
        if let Element::Close(name) = element {
            match name {
                b"Location" => result.location = Some(std::mem::take(text)),
                b"Bucket" => result.bucket = std::mem::take(text),
                b"Key" => result.key = std::mem::take(text),
                b"ETag" => result.etag = unquote_etag(text),
                _ => {}
            }
        }
        Ok(())
    })?;
    expect_root(status, body, &root, "CompleteMultipartUploadResult")?;

    Ok(result)
}

/// Parse one ListMultipartUploadsResult page
pub fn decode_list_uploads(status: StatusCode, body: &[u8]) -> Result<ListUploadsPage> {
    let mut page = ListUploadsPage::default();
    let mut current: Option<IncompleteUpload> = None;
    let mut in_common_prefixes = false;
    let mut is_truncated = None;

    let root = walk(status, body, |element, text| {
        let name = match element {
            Element::Open(b"Upload") => {
                current = Some(IncompleteUpload::new(String::new(), String::new()));
                return Ok(());
            }
            Element::Open(b"CommonPrefixes") => {
                in_common_prefixes = true;
                return Ok(());
            }
            Element::Open(_) => return Ok(()),
            Element::Close(name) => name,
        };
        match name {
            b"Key" => {
                if let Some(ref mut upload) = current {
                    upload.key = std::mem::take(text);
                }
            }
            b"UploadId" => {
                if let Some(ref mut upload) = current {
                    upload.upload_id = std::mem::take(text);
                }
            }
            b"Initiated" => {
                if let Some(ref mut upload) = current {
                    upload.initiated = std::mem::take(text);
                }
            }
            b"StorageClass" => {
                if let Some(ref mut upload) = current {
                    upload.storage_class = Some(std::mem::take(text));
                }
            }
            b"Upload" => {
                if let Some(upload) = current.take() {
                    if upload.key.is_empty() || upload.upload_id.is_empty() {
                        return Err("Upload entry without Key or UploadId".to_string());
                    }
                    page.uploads.push(upload);
                }
            }
            b"Prefix" if in_common_prefixes => {
                page.common_prefixes.push(std::mem::take(text));
            }
            b"CommonPrefixes" => in_common_prefixes = false,
            b"IsTruncated" => is_truncated = Some(parse_bool(text)?),
            b"NextKeyMarker" => page.next_key_marker = non_empty(std::mem::take(text)),
            b"NextUploadIdMarker" => {
                page.next_upload_id_marker = non_empty(std::mem::take(text))
            }
            _ => {}
        }
        Ok(())
    })?;
    expect_root(status, body, &root, "ListMultipartUploadsResult")?;

    page.is_truncated = is_truncated.unwrap_or(false);
    Ok(page)
}

/// Parse one ListPartsResult page. ETags come back unquoted.
pub fn decode_list_parts(status: StatusCode, body: &[u8]) -> Result<ListPartsPage> {
    let mut page = ListPartsPage::default();
    let mut current: Option<Part> = None;
    let mut is_truncated = None;

    let root = walk(status, body, |element, text| {
        let name = match element {
            Element::Open(b"Part") => {
                current = Some(Part::new(0, String::new(), 0));
                return Ok(());
            }
            Element::Open(_) => return Ok(()),
            Element::Close(name) => name,
        };
        match name {
            b"PartNumber" => {
                if let Some(ref mut part) = current {
                    part.part_number = parse_number("PartNumber", text)?;
                }
            }
            b"ETag" => {
                if let Some(ref mut part) = current {
                    part.etag = unquote_etag(text);
                }
            }
            b"Size" => {
                if let Some(ref mut part) = current {
                    part.size = parse_number("Size", text)?;
                }
            }
            b"LastModified" => {
                if let Some(ref mut part) = current {
                    part.last_modified = Some(std::mem::take(text));
                }
            }
            b"Part" => {
                if let Some(part) = current.take() {
                    if part.part_number == 0 || part.etag.is_empty() {
                        return Err("Part entry without PartNumber or ETag".to_string());
                    }
                    page.parts.push(part);
                }
            }
            b"IsTruncated" => is_truncated = Some(parse_bool(text)?),
            b"NextPartNumberMarker" => {
                if !text.trim().is_empty() {
                    page.next_part_number_marker =
                        Some(parse_number("NextPartNumberMarker", text)?);
                }
            }
            _ => {}
        }
        Ok(())
    })?;
    expect_root(status, body, &root, "ListPartsResult")?;

    page.is_truncated = is_truncated.unwrap_or(false);
    Ok(page)
}

fn parse_bool(text: &str) -> std::result::Result<bool, String> {
    match text.trim() {
        "true" | "TRUE" | "True" => Ok(true),
        "false" | "FALSE" | "False" | "" => Ok(false),
        other => Err(format!("invalid IsTruncated value {:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_UPLOADS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListMultipartUploadsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Bucket>bucket</Bucket>
  <KeyMarker></KeyMarker>
  <UploadIdMarker></UploadIdMarker>
  <NextKeyMarker>my-movie.m2ts</NextKeyMarker>
  <NextUploadIdMarker>YW55IGlkZWEgd2h5</NextUploadIdMarker>
  <MaxUploads>1000</MaxUploads>
  <IsTruncated>true</IsTruncated>
  <Upload>
    <Key>my-divisor</Key>
    <UploadId>XMgbGlrZSBlbHZpbmcncyBub3QgaGF2aW5n</UploadId>
    <Initiator><ID>arn:aws:iam::111122223333:user/user1</ID><DisplayName>user1</DisplayName></Initiator>
    <Owner><ID>75aa57f09aa0c8caeab4f8c24e99d10f8e7faeebf76c078efc7c6caea54ba06a</ID><DisplayName>OwnerDisplayName</DisplayName></Owner>
    <StorageClass>STANDARD</StorageClass>
    <Initiated>2010-11-10T20:48:33.000Z</Initiated>
  </Upload>
  <Upload>
    <Key>my-movie.m2ts</Key>
    <UploadId>YW55IGlkZWEgd2h5</UploadId>
    <StorageClass>STANDARD</StorageClass>
    <Initiated>2010-11-10T20:49:33.000Z</Initiated>
  </Upload>
  <CommonPrefixes><Prefix>photos/</Prefix></CommonPrefixes>
</ListMultipartUploadsResult>"#;

    const LIST_PARTS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListPartsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Bucket>example-bucket</Bucket>
  <Key>example-object</Key>
  <UploadId>XXBsb2FkIElEIGZvciBlbHZpbmcncyVcdS1tb3ZpZS5tMnRzEEEwbG9hZA</UploadId>
  <PartNumberMarker>1</PartNumberMarker>
  <NextPartNumberMarker>3</NextPartNumberMarker>
  <MaxParts>2</MaxParts>
  <IsTruncated>true</IsTruncated>
  <Part>
    <PartNumber>2</PartNumber>
    <LastModified>2010-11-10T20:48:34.000Z</LastModified>
    <ETag>"7778aef83f66abc1fa1e8477f296d394"</ETag>
    <Size>10485760</Size>
  </Part>
  <Part>
    <PartNumber>3</PartNumber>
    <LastModified>2010-11-10T20:48:33.000Z</LastModified>
    <ETag>&quot;aaaa18db4cc2f85cedef654fccc4a4x8&quot;</ETag>
    <Size>10485760</Size>
  </Part>
</ListPartsResult>"#;

    #[test]
    fn test_decode_list_uploads() {
        let page = decode_list_uploads(StatusCode::OK, LIST_UPLOADS.as_bytes()).unwrap();
        assert!(page.is_truncated);
        assert_eq!(page.next_key_marker.as_deref(), Some("my-movie.m2ts"));
        assert_eq!(page.next_upload_id_marker.as_deref(), Some("YW55IGlkZWEgd2h5"));
        assert_eq!(page.uploads.len(), 2);
        assert_eq!(page.uploads[0].key, "my-divisor");
        assert_eq!(page.uploads[0].upload_id, "XMgbGlrZSBlbHZpbmcncyBub3QgaGF2aW5n");
        assert_eq!(page.uploads[0].initiated, "2010-11-10T20:48:33.000Z");
        assert_eq!(page.uploads[1].storage_class.as_deref(), Some("STANDARD"));
        assert_eq!(page.common_prefixes, vec!["photos/".to_string()]);
    }

    #[test]
    fn test_decode_list_parts_unquotes_etags() {
        let page = decode_list_parts(StatusCode::OK, LIST_PARTS.as_bytes()).unwrap();
        assert!(page.is_truncated);
        assert_eq!(page.next_part_number_marker, Some(3));
        assert_eq!(page.parts.len(), 2);
        assert_eq!(page.parts[0].part_number, 2);
        assert_eq!(page.parts[0].etag, "7778aef83f66abc1fa1e8477f296d394");
        assert_eq!(page.parts[1].etag, "aaaa18db4cc2f85cedef654fccc4a4x8");
        assert_eq!(page.parts[1].size, 10485760);
    }

    #[test]
    fn test_decode_empty_truncated_page() {
        let body = r#"<ListPartsResult><NextPartNumberMarker>1000</NextPartNumberMarker><IsTruncated>true</IsTruncated></ListPartsResult>"#;
        let page = decode_list_parts(StatusCode::OK, body.as_bytes()).unwrap();
        assert!(page.parts.is_empty());
        assert!(page.is_truncated);
        assert_eq!(page.next_part_number_marker, Some(1000));
    }

    #[test]
    fn test_prefixed_namespace_is_tolerated() {
        let body = r#"<s3:InitiateMultipartUploadResult xmlns:s3="http://s3.amazonaws.com/doc/2006-03-01/"><s3:Bucket>b</s3:Bucket><s3:Key>k</s3:Key><s3:UploadId>id-1</s3:UploadId></s3:InitiateMultipartUploadResult>"#;
        let result = decode_initiate(StatusCode::OK, body.as_bytes()).unwrap();
        assert_eq!(result.upload_id, "id-1");
        assert_eq!(result.bucket, "b");
    }

    #[test]
    fn test_initiate_without_upload_id_is_malformed() {
        let body = "<InitiateMultipartUploadResult><Bucket>b</Bucket></InitiateMultipartUploadResult>";
        let err = decode_initiate(StatusCode::OK, body.as_bytes()).unwrap_err();
        assert!(matches!(err, S3Error::MalformedResponse { .. }));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = decode_list_uploads(StatusCode::OK, b"not xml at all").unwrap_err();
        assert!(matches!(err, S3Error::MalformedResponse { .. }));

        let err = decode_list_parts(StatusCode::OK, b"").unwrap_err();
        assert!(matches!(err, S3Error::MalformedResponse { .. }));

        let err = decode_list_parts(StatusCode::OK, b"<ListPartsResult><Part><PartNumber>x</PartNumber></Part></ListPartsResult>")
            .unwrap_err();
        assert!(matches!(err, S3Error::MalformedResponse { .. }));
    }

    #[test]
    fn test_complete_with_embedded_error() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>InternalError</Code><Message>We encountered an internal error. Please try again.</Message><RequestId>656c76696e6727732072657175657374</RequestId></Error>"#;
        let err = decode_complete(StatusCode::OK, body.as_bytes()).unwrap_err();
        match err {
            S3Error::Service {
                status,
                code,
                request_id,
                ..
            } => {
                assert_eq!(status, StatusCode::OK);
                assert_eq!(code, "InternalError");
                assert_eq!(request_id.as_deref(), Some("656c76696e6727732072657175657374"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_complete() {
        let body = r#"<CompleteMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><Location>http://bucket.s3.amazonaws.com/key</Location><Bucket>bucket</Bucket><Key>key</Key><ETag>"3858f62230ac3c915f300c664312c11f-9"</ETag></CompleteMultipartUploadResult>"#;
        let result = decode_complete(StatusCode::OK, body.as_bytes()).unwrap();
        assert_eq!(result.etag, "3858f62230ac3c915f300c664312c11f-9");
        assert_eq!(result.key, "key");
    }

    #[test]
    fn test_service_error_without_document() {
        match service_error(StatusCode::FORBIDDEN, b"denied") {
            S3Error::Service { code, message, .. } => {
                assert_eq!(code, "Forbidden");
                assert_eq!(message, "denied");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_encode_complete_multipart_upload() {
        let parts = vec![
            CompletedPart::new(1, "abc"),
            CompletedPart::new(2, "\"def\""),
        ];
        let xml = encode_complete_multipart_upload(&parts);
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains(
            "<Part><PartNumber>1</PartNumber><ETag>\"abc\"</ETag></Part>\
             <Part><PartNumber>2</PartNumber><ETag>\"def\"</ETag></Part>"
        ));
        assert!(xml.ends_with("</CompleteMultipartUpload>"));
    }

    #[test]
    fn test_xml_escape() {
        let mut buf = String::new();
        xml_escape_into(&mut buf, "a<b>&'\"");
        assert_eq!(buf, "a&lt;b&gt;&amp;&apos;&quot;");
    }
}
