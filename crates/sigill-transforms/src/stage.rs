#![forbid(unsafe_code)]

//! Transform stages and the URI registry that builds them.
//!
//! Every registered algorithm URI maps to one [`TransformStage`]
//! variant; the variant carries the parameters read from its
//! `Transform` element and is executed through a single dispatch in
//! [`TransformStage::execute`].

use crate::base64_transform;
use crate::enveloped;
use crate::pipeline::{TransformContext, TransformData};
use crate::selection::{Selection, SelectionKind};
use crate::xpath_filter::{self, BoundXPath, Filter2Step, FilterOp};
use roxmltree::Node;
use sigill_c14n::{C14nMode, CanonicalizationMethod, Canonicalizer};
use sigill_core::{algorithm, ns, AlgorithmUri, Error, Family, Result};
use sigill_crypto::{HashType, SignatureAlgorithm};
use sigill_keys::KeyHandle;
use sigill_xml::document::{child_element, child_elements, is_element, parse_text};
use sigill_xml::XmlWriter;

/// Which C14N 2.0 QName-aware set a name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QNameAwareKind {
    Element,
    QualifiedAttr,
    XPathElement,
}

impl QNameAwareKind {
    fn local_name(self) -> &'static str {
        match self {
            QNameAwareKind::Element => ns::node::ELEMENT,
            QNameAwareKind::QualifiedAttr => ns::node::QUALIFIED_ATTR,
            QNameAwareKind::XPathElement => ns::node::XPATH_ELEMENT,
        }
    }
}

/// Parameters of a canonicalization stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct C14nParams {
    pub mode: C14nMode,
    /// Exclusive C14N `InclusiveNamespaces PrefixList`.
    pub inclusive_prefixes: Vec<String>,
    /// C14N 2.0 `PrefixRewrite` = `sequential`.
    pub rewrite_prefixes: bool,
    /// C14N 2.0 `TrimTextNodes`.
    pub trim_text: bool,
    /// C14N 2.0 `QNameAware` entries as `(kind, name, namespace)`.
    pub qname_aware: Vec<(QNameAwareKind, String, String)>,
}

impl C14nParams {
    pub fn new(mode: C14nMode) -> Self {
        Self {
            mode,
            inclusive_prefixes: Vec::new(),
            rewrite_prefixes: false,
            trim_text: false,
            qname_aware: Vec::new(),
        }
    }

    /// A canonicalizer configured with these parameters.
    pub fn canonicalizer<'f>(&self) -> Canonicalizer<'f> {
        let mut c = Canonicalizer::new(self.mode)
            .inclusive_prefixes(&self.inclusive_prefixes)
            .rewrite_prefixes(self.rewrite_prefixes)
            .preserve_whitespace(!self.trim_text);
        for (kind, name, namespace) in &self.qname_aware {
            c = match kind {
                QNameAwareKind::Element => c.add_qname_aware_element(name, namespace),
                QNameAwareKind::QualifiedAttr => c.add_qname_aware_attribute(name, namespace),
                QNameAwareKind::XPathElement => c.add_qname_aware_xpath_element(name, namespace),
            };
        }
        c
    }

    fn read_element(&mut self, transform: Node<'_, '_>) -> Result<()> {
        if self.mode.is_exclusive() {
            if let Some(inc) = child_element(transform, ns::EXC_C14N, ns::node::INCLUSIVE_NAMESPACES) {
                self.inclusive_prefixes = inc
                    .attribute(ns::attr::PREFIX_LIST)
                    .unwrap_or("")
                    .split_whitespace()
                    .map(str::to_owned)
                    .collect();
            }
        }
        if self.mode.method != CanonicalizationMethod::C14n20 {
            return Ok(());
        }
        for param in transform.children().filter(|n| n.is_element()) {
            if param.tag_name().namespace() != Some(ns::C14N2) {
                continue;
            }
            let value = param.text().unwrap_or("").trim();
            match param.tag_name().name() {
                ns::node::IGNORE_COMMENTS => self.mode.with_comments = !parse_flag(param, value)?,
                ns::node::TRIM_TEXT_NODES => self.trim_text = parse_flag(param, value)?,
                ns::node::PREFIX_REWRITE => {
                    self.rewrite_prefixes = match value {
                        "none" => false,
                        "sequential" => true,
                        other => {
                            return Err(Error::MalformedInput(format!(
                                "unsupported PrefixRewrite {other:?}"
                            )))
                        }
                    }
                }
                ns::node::QNAME_AWARE => {
                    for entry in param.children().filter(|n| n.is_element()) {
                        let kind = match entry.tag_name().name() {
                            ns::node::ELEMENT => QNameAwareKind::Element,
                            ns::node::QUALIFIED_ATTR => QNameAwareKind::QualifiedAttr,
                            ns::node::XPATH_ELEMENT => QNameAwareKind::XPathElement,
                            other => {
                                return Err(Error::MalformedInput(format!(
                                    "unexpected <{other}> in QNameAware"
                                )))
                            }
                        };
                        let name = entry.attribute(ns::attr::NAME).ok_or_else(|| {
                            Error::MissingAttribute(format!("Name on {}", kind.local_name()))
                        })?;
                        let namespace = entry.attribute(ns::attr::NS).unwrap_or("");
                        self.qname_aware.push((kind, name.to_owned(), namespace.to_owned()));
                    }
                }
                other => {
                    return Err(Error::MalformedInput(format!(
                        "unknown C14N 2.0 parameter <{other}>"
                    )))
                }
            }
        }
        Ok(())
    }

    fn write_params(&self, w: &mut XmlWriter) -> Result<()> {
        if self.mode.is_exclusive() && !self.inclusive_prefixes.is_empty() {
            let list = self.inclusive_prefixes.join(" ");
            w.empty_element(
                "ec:InclusiveNamespaces",
                &[("xmlns:ec", ns::EXC_C14N), (ns::attr::PREFIX_LIST, &list)],
            )?;
        }
        if self.mode.method != CanonicalizationMethod::C14n20 {
            return Ok(());
        }
        let decl = [("xmlns:c14n2", ns::C14N2)];
        if self.mode.with_comments {
            w.text_element("c14n2:IgnoreComments", &decl, "false")?;
        }
        if self.trim_text {
            w.text_element("c14n2:TrimTextNodes", &decl, "true")?;
        }
        if self.rewrite_prefixes {
            w.text_element("c14n2:PrefixRewrite", &decl, "sequential")?;
        }
        if !self.qname_aware.is_empty() {
            w.start_element("c14n2:QNameAware", &decl)?;
            for (kind, name, namespace) in &self.qname_aware {
                w.empty_element(
                    &format!("c14n2:{}", kind.local_name()),
                    &[(ns::attr::NAME, name), (ns::attr::NS, namespace)],
                )?;
            }
            w.end_element("c14n2:QNameAware")?;
        }
        Ok(())
    }
}

fn parse_flag(param: Node<'_, '_>, value: &str) -> Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(Error::MalformedInput(format!(
            "<{}> expects a boolean, found {other:?}",
            param.tag_name().name()
        ))),
    }
}

/// One step of a reference's transform chain.
#[derive(Debug, Clone)]
pub enum TransformStage {
    Canonicalize(C14nParams),
    Base64Decode,
    /// Octets to base64 text. Has no `Transform` element form.
    Base64Encode,
    EnvelopedSignature,
    XPath(BoundXPath),
    XPathFilter2(Vec<Filter2Step>),
    /// Recognised but never executed.
    Xslt,
    Selection(Selection),
    /// Octets to raw digest.
    Digest(&'static str),
    /// Octets to raw HMAC; the key must be bound before execution.
    Hmac {
        uri: &'static str,
        hash: HashType,
        key: Option<Vec<u8>>,
    },
}

impl TransformStage {
    /// Build the stage registered for `uri` with default parameters.
    ///
    /// Unknown URIs, and algorithms that are not transforms, fail with
    /// [`Error::UnsupportedAlgorithm`]. XPath stages need their
    /// expression and must be built with [`TransformStage::from_element`].
    pub fn from_uri(uri: &str) -> Result<Self> {
        let alg = AlgorithmUri::parse(uri)?;
        match alg.family() {
            Family::Canonicalization => {
                let mode = C14nMode::from_uri(alg.as_str())
                    .ok_or_else(|| Error::UnsupportedAlgorithm(uri.to_owned()))?;
                Ok(TransformStage::Canonicalize(C14nParams::new(mode)))
            }
            Family::Encoding => Ok(TransformStage::Base64Decode),
            Family::Digest => {
                sigill_crypto::digest::output_len(alg.as_str())?;
                Ok(TransformStage::Digest(alg.as_str()))
            }
            Family::Mac => Ok(TransformStage::Hmac {
                uri: alg.as_str(),
                hash: SignatureAlgorithm::from_uri(alg.as_str())?.hash(),
                key: None,
            }),
            Family::Selection => {
                let kind = SelectionKind::from_uri(alg.as_str())
                    .ok_or_else(|| Error::UnsupportedAlgorithm(uri.to_owned()))?;
                Ok(TransformStage::Selection(Selection::new(kind, "")))
            }
            Family::Transform => match alg.as_str() {
                algorithm::ENVELOPED_SIGNATURE => Ok(TransformStage::EnvelopedSignature),
                algorithm::XSLT => Ok(TransformStage::Xslt),
                _ => Err(Error::MalformedInput(format!("{uri} requires XPath parameters"))),
            },
            _ => Err(Error::UnsupportedAlgorithm(format!("{uri} is not a transform"))),
        }
    }

    /// Build a stage from a `ds:Transform` or `dsig2:Selection` element,
    /// reading its parameter children.
    pub fn from_element(element: Node<'_, '_>) -> Result<Self> {
        let uri = element
            .attribute(ns::attr::ALGORITHM)
            .ok_or_else(|| Error::MissingAttribute(format!("Algorithm on {}", element.tag_name().name())))?;
        let is_selection_element = is_element(element, ns::DSIG2, ns::node::SELECTION);

        let stage = match uri {
            algorithm::XPATH => {
                let param = child_element(element, ns::DSIG, ns::node::XPATH)
                    .ok_or_else(|| Error::MissingElement("XPath transform parameter".into()))?;
                TransformStage::XPath(BoundXPath::from_element(param)?)
            }
            algorithm::XPATH2 => {
                let params = child_elements(element, ns::XPATH2, ns::node::XPATH);
                if params.is_empty() {
                    return Err(Error::MissingElement("XPath Filter 2.0 parameter".into()));
                }
                let mut steps = Vec::with_capacity(params.len());
                for param in params {
                    let filter = param
                        .attribute(ns::attr::FILTER)
                        .ok_or_else(|| Error::MissingAttribute("Filter on XPath".into()))?;
                    steps.push(Filter2Step {
                        op: FilterOp::parse(filter)?,
                        xpath: BoundXPath::from_element(param)?,
                    });
                }
                TransformStage::XPathFilter2(steps)
            }
            _ => match Self::from_uri(uri)? {
                TransformStage::Canonicalize(mut params) => {
                    params.read_element(element)?;
                    TransformStage::Canonicalize(params)
                }
                TransformStage::Selection(selection) => {
                    TransformStage::Selection(Selection::from_element(selection.kind, element)?)
                }
                other => other,
            },
        };

        if is_selection_element && !stage.is_selection() {
            return Err(Error::XmlStructure(format!("Selection with non-selection algorithm {uri}")));
        }
        Ok(stage)
    }

    /// The algorithm URI this stage is registered under.
    pub fn uri(&self) -> &'static str {
        match self {
            TransformStage::Canonicalize(params) => params.mode.uri(),
            TransformStage::Base64Decode | TransformStage::Base64Encode => algorithm::BASE64,
            TransformStage::EnvelopedSignature => algorithm::ENVELOPED_SIGNATURE,
            TransformStage::XPath(_) => algorithm::XPATH,
            TransformStage::XPathFilter2(_) => algorithm::XPATH2,
            TransformStage::Xslt => algorithm::XSLT,
            TransformStage::Selection(selection) => selection.kind.uri(),
            TransformStage::Digest(uri) => *uri,
            TransformStage::Hmac { uri, .. } => *uri,
        }
    }

    /// DSIG 2.0 selections supply their own input.
    pub fn is_selection(&self) -> bool {
        matches!(self, TransformStage::Selection(_))
    }

    /// Bind the secret of an HMAC stage.
    pub fn bind_key(&mut self, handle: &KeyHandle) -> Result<()> {
        match self {
            TransformStage::Hmac { key, .. } => {
                *key = Some(handle.export_raw_bytes()?.to_vec());
                Ok(())
            }
            other => Err(Error::Transform(format!("{} takes no key", other.uri()))),
        }
    }

    /// Run this stage over `input`.
    pub fn execute(&self, input: TransformData, ctx: &TransformContext<'_>) -> Result<TransformData> {
        match self {
            TransformStage::Canonicalize(params) => canonicalize(params, input),
            TransformStage::Base64Decode => base64_transform::decode(input),
            TransformStage::Base64Encode => base64_transform::encode(input),
            TransformStage::EnvelopedSignature => enveloped::apply(input, ctx),
            TransformStage::XPath(filter) => xpath_filter::apply_xpath(filter, input, ctx),
            TransformStage::XPathFilter2(steps) => xpath_filter::apply_filter2(steps, input, ctx),
            TransformStage::Xslt => Err(Error::UnsupportedAlgorithm(format!(
                "{} transforms are not executed",
                algorithm::XSLT
            ))),
            TransformStage::Selection(selection) => selection.execute(ctx),
            TransformStage::Digest(uri) => {
                let data = input.into_binary()?;
                Ok(TransformData::Binary(sigill_crypto::digest::digest(uri, &data)?))
            }
            TransformStage::Hmac { uri, hash, key } => {
                let key = key
                    .as_deref()
                    .ok_or_else(|| Error::KeyMismatch(format!("{uri} stage has no key bound")))?;
                let data = input.into_binary()?;
                Ok(TransformData::Binary(sigill_crypto::compute_hmac(*hash, key, &data)?))
            }
        }
    }

    /// Serialize this stage as a `Transform` (or `dsig2:Selection`)
    /// element. `prefix` is the already-declared DSig prefix.
    pub fn write_element(&self, w: &mut XmlWriter, prefix: &str) -> Result<()> {
        if let TransformStage::Selection(selection) = self {
            return write_selection(w, selection);
        }
        if matches!(self, TransformStage::Base64Encode) {
            return Err(Error::Transform("base64 encoding has no Transform element".into()));
        }

        self.write_as(w, prefix, &qname(prefix, ns::node::TRANSFORM))
    }

    /// Write this stage as an element called `name`, as for a
    /// `CanonicalizationMethod` carrying canonicalization parameters.
    pub fn write_as(&self, w: &mut XmlWriter, prefix: &str, name: &str) -> Result<()> {
        let attrs = [(ns::attr::ALGORITHM, self.uri())];
        match self {
            TransformStage::Canonicalize(params) => {
                w.start_element(name, &attrs)?;
                params.write_params(w)?;
            }
            TransformStage::XPath(filter) => {
                w.start_element(name, &attrs)?;
                write_xpath(w, &qname(prefix, ns::node::XPATH), None, filter)?;
            }
            TransformStage::XPathFilter2(steps) => {
                w.start_element(name, &attrs)?;
                for step in steps {
                    let decl = ("xmlns:dsig-xpath", ns::XPATH2);
                    let filter = (ns::attr::FILTER, step.op.as_str());
                    write_xpath(w, "dsig-xpath:XPath", Some(&[decl, filter]), &step.xpath)?;
                }
            }
            _ => return w.empty_element(name, &attrs),
        }
        w.end_element(name)
    }
}

fn canonicalize(params: &C14nParams, input: TransformData) -> Result<TransformData> {
    let out = match input {
        TransformData::Xml {
            xml_text, node_set, ..
        } => {
            let doc = parse_text(&xml_text)?;
            match &node_set {
                Some(set) => params.canonicalizer().node_set(set).canonicalize_document(&doc)?,
                None => params.canonicalizer().canonicalize_document(&doc)?,
            }
        }
        TransformData::Text(text) => params.canonicalizer().canonicalize_data(text.as_bytes())?,
        TransformData::Binary(data) => params.canonicalizer().canonicalize_data(&data)?,
    };
    Ok(TransformData::Binary(out))
}

fn qname(prefix: &str, local: &str) -> String {
    if prefix.is_empty() {
        local.to_owned()
    } else {
        format!("{prefix}:{local}")
    }
}

fn write_xpath(
    w: &mut XmlWriter,
    name: &str,
    extra: Option<&[(&str, &str)]>,
    xpath: &BoundXPath,
) -> Result<()> {
    let decls: Vec<(String, &str)> = xpath
        .namespaces
        .iter()
        .map(|(p, u)| (format!("xmlns:{p}"), u.as_str()))
        .collect();
    let mut attrs: Vec<(&str, &str)> = extra.unwrap_or(&[]).to_vec();
    attrs.extend(decls.iter().map(|(k, v)| (k.as_str(), *v)));
    w.text_element(name, &attrs, xpath.source())
}

fn write_selection(w: &mut XmlWriter, selection: &Selection) -> Result<()> {
    w.start_element(
        "dsig2:Selection",
        &[
            ("xmlns:dsig2", ns::DSIG2),
            (ns::attr::ALGORITHM, selection.kind.uri()),
            (ns::attr::URI, &selection.uri),
        ],
    )?;
    for xpath in &selection.included {
        write_xpath(w, "dsig2:IncludedXPath", None, xpath)?;
    }
    for xpath in &selection.excluded {
        write_xpath(w, "dsig2:ExcludedXPath", None, xpath)?;
    }
    w.end_element("dsig2:Selection")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::UriResolver;
    use sigill_keys::{build_secret_key, KeyKind};

    fn first_child(xml: &str) -> TransformStage {
        let doc = parse_text(xml).unwrap();
        let el = doc.root_element().children().find(|n| n.is_element()).unwrap();
        TransformStage::from_element(el).unwrap()
    }

    #[test]
    fn test_registry_covers_transform_uris() {
        for uri in [
            algorithm::C14N,
            algorithm::C14N_WITH_COMMENTS,
            algorithm::EXC_C14N,
            algorithm::EXC_C14N_WITH_COMMENTS,
            algorithm::C14N11,
            algorithm::C14N11_WITH_COMMENTS,
            algorithm::C14N20,
            algorithm::BASE64,
            algorithm::ENVELOPED_SIGNATURE,
            algorithm::XSLT,
            algorithm::DSIG2_XML_SELECTION,
            algorithm::SHA256,
            algorithm::HMAC_SHA256,
        ] {
            assert_eq!(TransformStage::from_uri(uri).unwrap().uri(), uri);
        }
        assert!(matches!(
            TransformStage::from_uri("urn:nothing"),
            Err(Error::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            TransformStage::from_uri(algorithm::AES128_CBC),
            Err(Error::UnsupportedAlgorithm(_))
        ));
        assert!(TransformStage::from_uri(algorithm::XPATH).is_err());
    }

    #[test]
    fn test_exclusive_prefix_list() {
        let stage = first_child(
            r#"<T xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:Transform Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"><ec:InclusiveNamespaces xmlns:ec="http://www.w3.org/2001/10/xml-exc-c14n#" PrefixList="a #default"/></ds:Transform></T>"#,
        );
        match stage {
            TransformStage::Canonicalize(params) => {
                assert_eq!(params.inclusive_prefixes, vec!["a", "#default"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_c14n2_parameters() {
        let stage = first_child(
            r#"<T xmlns:ds="http://www.w3.org/2000/09/xmldsig#" xmlns:c="http://www.w3.org/2010/xml-c14n2"><ds:Transform Algorithm="http://www.w3.org/2010/xml-c14n2">
                <c:IgnoreComments>false</c:IgnoreComments>
                <c:TrimTextNodes>true</c:TrimTextNodes>
                <c:PrefixRewrite>sequential</c:PrefixRewrite>
                <c:QNameAware><c:QualifiedAttr Name="type" NS="urn:x"/></c:QNameAware>
            </ds:Transform></T>"#,
        );
        let TransformStage::Canonicalize(params) = stage else {
            panic!("not a canonicalization stage");
        };
        assert!(params.mode.with_comments);
        assert!(params.trim_text);
        assert!(params.rewrite_prefixes);
        assert_eq!(
            params.qname_aware,
            vec![(QNameAwareKind::QualifiedAttr, "type".to_owned(), "urn:x".to_owned())]
        );

        let resolver = UriResolver::new();
        let ctx = TransformContext::new(&resolver);
        let out = TransformStage::Canonicalize(params)
            .execute(TransformData::Binary(b"<a:r xmlns:a='urn:a'> <!--c--> x </a:r>".to_vec()), &ctx)
            .unwrap();
        assert_eq!(out.into_binary().unwrap(), br#"<n0:r xmlns:n0="urn:a"><!--c-->x</n0:r>"#);
    }

    #[test]
    fn test_filter2_element() {
        let stage = first_child(
            r#"<T xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:Transform Algorithm="http://www.w3.org/2002/06/xmldsig-filter2"><f:XPath xmlns:f="http://www.w3.org/2002/06/xmldsig-filter2" Filter="subtract">//x</f:XPath><f:XPath xmlns:f="http://www.w3.org/2002/06/xmldsig-filter2" Filter="union">//y</f:XPath></ds:Transform></T>"#,
        );
        let TransformStage::XPathFilter2(steps) = stage else {
            panic!("not a filter");
        };
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].op, FilterOp::Subtract);
        assert_eq!(steps[1].xpath.source(), "//y");
    }

    #[test]
    fn test_hmac_stage_requires_key() {
        let resolver = UriResolver::new();
        let ctx = TransformContext::new(&resolver);
        let mut stage = TransformStage::from_uri(algorithm::HMAC_SHA1).unwrap();
        let input = TransformData::Binary(b"what do ya want for nothing?".to_vec());
        assert!(matches!(stage.execute(input.clone(), &ctx), Err(Error::KeyMismatch(_))));

        stage.bind_key(&build_secret_key(KeyKind::Hmac, b"Jefe").unwrap()).unwrap();
        let out = stage.execute(input, &ctx).unwrap().into_binary().unwrap();
        assert_eq!(hex::encode(out), "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79");

        assert!(TransformStage::Base64Decode
            .bind_key(&build_secret_key(KeyKind::Hmac, b"k").unwrap())
            .is_err());
    }

    #[test]
    fn test_digest_stage() {
        let resolver = UriResolver::new();
        let ctx = TransformContext::new(&resolver);
        let stage = TransformStage::from_uri(algorithm::SHA256).unwrap();
        let out = stage.execute(TransformData::Text("abc".into()), &ctx).unwrap();
        assert_eq!(
            hex::encode(out.into_binary().unwrap()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_xslt_is_not_executed() {
        let resolver = UriResolver::new();
        let ctx = TransformContext::new(&resolver);
        let err = TransformStage::Xslt
            .execute(TransformData::Text("<a/>".into()), &ctx)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn test_write_element_reparses() {
        let stages = vec![
            TransformStage::EnvelopedSignature,
            TransformStage::XPath(
                BoundXPath::new("not(ancestor-or-self::ds:Signature)")
                    .unwrap()
                    .with_namespace("ds", ns::DSIG),
            ),
            TransformStage::Canonicalize(C14nParams {
                inclusive_prefixes: vec!["p".into()],
                ..C14nParams::new(C14nMode::from_uri(algorithm::EXC_C14N).unwrap())
            }),
        ];
        let mut w = XmlWriter::new();
        w.start_element("ds:Transforms", &[("xmlns:ds", ns::DSIG)]).unwrap();
        for stage in &stages {
            stage.write_element(&mut w, "ds").unwrap();
        }
        w.end_element("ds:Transforms").unwrap();
        let xml = w.into_string().unwrap();

        let doc = parse_text(&xml).unwrap();
        let parsed: Vec<TransformStage> = doc
            .root_element()
            .children()
            .filter(|n| n.is_element())
            .map(|n| TransformStage::from_element(n).unwrap())
            .collect();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].uri(), algorithm::ENVELOPED_SIGNATURE);
        match &parsed[1] {
            TransformStage::XPath(x) => assert_eq!(x.source(), "not(ancestor-or-self::ds:Signature)"),
            other => panic!("unexpected {other:?}"),
        }
        match &parsed[2] {
            TransformStage::Canonicalize(p) => assert_eq!(p.inclusive_prefixes, vec!["p"]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(TransformStage::Base64Encode.write_element(&mut XmlWriter::new(), "ds").is_err());
    }
}
