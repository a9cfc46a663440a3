use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use syn::{
    parse_macro_input,
    DeriveInput,
    Data,
    DataStruct,
    Fields,
    FieldsNamed,
    Field,
    Meta,
    Lit,
};
use quote::quote;

/// Field tag given by `#[zeropb(tag = N)]`, if any.
fn field_tag(field: &Field) -> Option<u32> {
    let attr = field.attrs
        .iter()
        .find(|attr| attr.path.is_ident("zeropb"))?;
    // the only attribute we currently support is tag
    let meta = attr.parse_args::<Meta>()
        .expect("attribute failed to parse");
    let meta =
        match meta {
            Meta::NameValue(meta) => meta,
            _ => panic!("attribute must be name/value style"),
        };
    assert!(meta.path.is_ident("tag"), "unsupported attribute name");
    let tag =
        match meta.lit {
            Lit::Int(int) => int.base10_parse::<u32>()
                .expect("tag must fit in u32"),
            _ => panic!("tag must be int"),
        };
    assert!(tag > 0, "tag must be positive");
    Some(tag)
}

#[proc_macro_derive(Message, attributes(zeropb))]
pub fn derive_message(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let name = &input.ident;
    assert!(
        input.generics.params.is_empty(),
        "cannot derive Message on a generic type",
    );
    let fields: Vec<&Field> = match &input.data {
        &Data::Struct(DataStruct {
            fields: Fields::Named(FieldsNamed { ref named, .. }),
            ..
        }) => named.iter().collect(),
        // unit struct is an empty message, constructible as `Name {}`
        &Data::Struct(DataStruct { fields: Fields::Unit, .. }) => Vec::new(),
        &Data::Struct(_) => panic!("cannot derive Message on a tuple struct"),
        &Data::Enum(_) => panic!("cannot derive Message on an enum"),
        &Data::Union(_) => panic!("cannot derive Message on a union"),
    };

    // offset of each field is the sum of the sizes before it, as a constant
    // expression
    let mut offsets: Vec<TokenStream2> = Vec::with_capacity(fields.len());
    let mut offset = quote! { 0u32 };
    for field in &fields {
        offsets.push(offset.clone());
        let field_ty = &field.ty;
        offset = quote! {
            #offset + <#field_ty as ::zeropb::Slot>::SIZE
        };
    }
    let size = offset;

    let field_schemas = fields.iter()
        .enumerate()
        .map(|(i, field)| {
            let field_name = field.ident.as_ref().unwrap().to_string();
            let field_ty = &field.ty;
            let tag = field_tag(field).unwrap_or(i as u32 + 1);
            quote! {
                ::zeropb::FieldSchema::new(
                    #field_name,
                    #tag,
                    <#field_ty as ::zeropb::Slot>::field_kind(stack),
                )
            }
        })
        .collect::<Vec<_>>();

    let marshal_fields = fields.iter()
        .zip(&offsets)
        .map(|(field, offset)| {
            let field_ident = field.ident.as_ref().unwrap();
            let field_name = field_ident.to_string();
            let field_ty = &field.ty;
            quote! {
                <#field_ty as ::zeropb::Slot>::marshal_slot(
                    &self.#field_ident,
                    buf,
                    at + (#offset),
                ).map_err(|e| e.in_field(#field_name))?;
            }
        })
        .collect::<Vec<_>>();

    let unmarshal_fields = fields.iter()
        .zip(&offsets)
        .map(|(field, offset)| {
            let field_ident = field.ident.as_ref().unwrap();
            let field_name = field_ident.to_string();
            let field_ty = &field.ty;
            quote! {
                #field_ident: <#field_ty as ::zeropb::Slot>::unmarshal_slot(
                    reader,
                    at + (#offset),
                ).map_err(|e| e.in_field(#field_name))?,
            }
        })
        .collect::<Vec<_>>();

    let segment_lens = fields.iter()
        .map(|field| {
            let field_ident = field.ident.as_ref().unwrap();
            let field_ty = &field.ty;
            quote! {
                + <#field_ty as ::zeropb::Slot>::segment_len(&self.#field_ident)
            }
        })
        .collect::<Vec<_>>();

    let name_str = name.to_string();

    quote! {
        impl ::zeropb::Slot for #name {
            const SIZE: u32 = #size;

            fn field_kind(
                stack: ::zeropb::RecurseStack,
            ) -> ::zeropb::FieldKind {
                ::zeropb::message::message_field_kind::<Self>(stack)
            }

            fn marshal_slot(
                &self,
                buf: &mut ::zeropb::Buffer,
                at: u32,
            ) -> ::zeropb::error::Result<()> {
                <Self as ::zeropb::Message>::marshal_fields(self, buf, at)
            }

            fn unmarshal_slot(
                reader: &mut ::zeropb::Reader,
                at: u32,
            ) -> ::zeropb::error::Result<Self> {
                <Self as ::zeropb::Message>::unmarshal_fields(reader, at)
            }

            fn segment_len(&self) -> u64 {
                0u64 #( #segment_lens )*
            }
        }

        impl ::zeropb::Message for #name {
            #[allow(unused_variables)]
            fn schema_in(
                parent_stack: ::zeropb::RecurseStack,
            ) -> ::zeropb::MessageSchema {
                let stack = parent_stack.with_type_layer::<Self>();
                ::zeropb::MessageSchema::new(
                    #name_str,
                    ::std::vec![#( #field_schemas ),*],
                )
            }

            #[allow(unused_variables)]
            fn marshal_fields(
                &self,
                buf: &mut ::zeropb::Buffer,
                at: u32,
            ) -> ::zeropb::error::Result<()> {
                #( #marshal_fields )*
                ::std::result::Result::Ok(())
            }

            #[allow(unused_variables)]
            fn unmarshal_fields(
                reader: &mut ::zeropb::Reader,
                at: u32,
            ) -> ::zeropb::error::Result<Self> {
                ::std::result::Result::Ok(#name { #( #unmarshal_fields )* })
            }
        }
    }.into()
}
